use assert_cmd::Command;

fn gf3() -> Command {
    Command::cargo_bin("gf3").unwrap()
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn info_reports_identity_and_bars() {
    let out = stdout_of(gf3().args(["--model", "geforce3-ti200", "info"]));
    assert!(out.contains("pci:      10de:0201"), "{out}");
    assert!(out.contains("boot0:    0x02200010"), "{out}");
    assert!(out.contains("bar1:     vram 0x4000000 bytes prefetchable"), "{out}");
    assert!(out.contains("preferred 1024x768"), "{out}");
}

#[test]
fn edid_dump_after_resize() {
    let out = stdout_of(gf3().args(["edid", "--width", "1920", "--height", "1080"]));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 16);
    assert_eq!(lines[0], "0000: 00 ff ff ff ff ff ff 00 3a c4 00 02 4e 61 bc 00");
}

#[test]
fn modeset_accepts_and_rejects() {
    let out = stdout_of(gf3().args(["modeset", "--width", "1024", "--height", "768"]));
    assert_eq!(
        out.trim(),
        "accepted 1024x768x32 virtual 1024x768 pitch 4096 linear"
    );

    gf3()
        .args(["modeset", "--width", "4000", "--height", "768"])
        .assert()
        .failure();
}

#[test]
fn snapshot_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gf3.snap");
    gf3()
        .args(["snapshot", "--out"])
        .arg(&path)
        .assert()
        .success();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"GF3S");
}

#[test]
fn invalid_vram_size_fails() {
    gf3().args(["--vram-mb", "96", "info"]).assert().failure();
}

#[test]
fn edid_rejects_sizes_an_edid_cannot_describe() {
    gf3()
        .args(["edid", "--width", "1024", "--height", "300000000"])
        .assert()
        .failure();
    gf3()
        .args(["edid", "--width", "0", "--height", "768"])
        .assert()
        .failure();
}
