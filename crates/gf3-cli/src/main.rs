#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gf3_device::ddc::EDID_SLAVE_ADDR;
use gf3_device::edid::MAX_DIMENSION;
use gf3_device::mmio::{DDC_REG_DATA, DDC_REG_STOP, DDC_WINDOW_START};
use gf3_device::vbe::{
    VBE_DISPI_DATA_PORT, VBE_DISPI_INDEX_BPP, VBE_DISPI_INDEX_ENABLE, VBE_DISPI_INDEX_PORT,
    VBE_DISPI_INDEX_VIRT_HEIGHT, VBE_DISPI_INDEX_VIRT_WIDTH, VBE_DISPI_INDEX_XRES,
    VBE_DISPI_INDEX_YRES,
};
use gf3_device::{
    Aperture, GeForce3, Gf3Config, Gf3Model, PortIO, VbeEnable, BAR_CRTC, BAR_MMIO, BAR_VRAM,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gf3", about = "Inspect and exercise the emulated GeForce3 display adapter")]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct DeviceArgs {
    /// Board to emulate (geforce3, geforce3-ti200, geforce3-ti500, geforce256-ddr,
    /// geforce2-mx, geforce2-gts, geforce2-ti).
    #[arg(long, global = true, default_value = "geforce3")]
    model: Gf3Model,

    /// VRAM size in MiB (power of two, 64..=512).
    #[arg(long, global = true, default_value_t = 64)]
    vram_mb: usize,

    /// Video BIOS image exposed through the expansion ROM BAR.
    #[arg(long, global = true)]
    romfile: Option<PathBuf>,

    /// Three-letter EDID manufacturer id.
    #[arg(long, global = true)]
    edid_vendor: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print PCI identity, PMC_BOOT_0 and the BAR layout.
    Info,

    /// Read the EDID over the DDC bus and hex-dump it.
    Edid {
        /// Resize the display before reading (requires --height).
        #[arg(long, requires = "height")]
        width: Option<u32>,
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },

    /// Program a VBE mode through the DISPI ports and report the result.
    Modeset {
        #[arg(long)]
        width: u16,
        #[arg(long)]
        height: u16,
        #[arg(long, default_value_t = 32)]
        bpp: u16,
        #[arg(long)]
        virt_width: Option<u16>,
        #[arg(long)]
        virt_height: Option<u16>,
        /// Use the banked 0xA0000 window instead of the linear framebuffer.
        #[arg(long)]
        banked: bool,
    },

    /// Write a device snapshot to a file.
    Snapshot {
        #[arg(long, short)]
        out: PathBuf,
        #[arg(long, requires = "height")]
        width: Option<u32>,
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },
}

fn build_device(args: &DeviceArgs) -> Result<GeForce3> {
    let mut config = Gf3Config::for_model(args.model);
    config.vram_size = args
        .vram_mb
        .checked_mul(1024 * 1024)
        .context("VRAM size overflow")?;
    if let Some(path) = &args.romfile {
        let rom = fs::read(path).with_context(|| format!("reading ROM {}", path.display()))?;
        config.rom = Some(rom);
    }
    if let Some(vendor) = &args.edid_vendor {
        config.set_edid_vendor(vendor)?;
    }
    GeForce3::realize(config).context("realizing adapter")
}

fn resize(dev: &mut GeForce3, width: u32, height: u32) -> Result<()> {
    if !dev.edid().info().with_preferred(width, height).dimensions_valid() {
        bail!(
            "display size {width}x{height} cannot be described by an EDID (1..={} per axis)",
            MAX_DIMENSION
        );
    }
    dev.resize_display(width, height);
    Ok(())
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", line * 16);
        for b in chunk {
            let _ = write!(out, " {b:02x}");
        }
        out.push('\n');
    }
    out
}

/// Reads `len` bytes from the monitor EEPROM through the DDC data register.
fn read_edid_over_ddc(dev: &mut GeForce3, len: usize) -> Vec<u8> {
    let data = u64::from(DDC_WINDOW_START + DDC_REG_DATA);
    let stop = u64::from(DDC_WINDOW_START + DDC_REG_STOP);
    dev.write(Aperture::Crtc, data, 1, u64::from(EDID_SLAVE_ADDR | 1));
    let bytes = (0..len)
        .map(|_| dev.read(Aperture::Crtc, data, 1) as u8)
        .collect();
    dev.write(Aperture::Crtc, stop, 4, 1);
    bytes
}

fn vbe_write(dev: &mut GeForce3, index: u16, value: u16) {
    dev.port_write(VBE_DISPI_INDEX_PORT, 2, u32::from(index));
    dev.port_write(VBE_DISPI_DATA_PORT, 2, u32::from(value));
}

fn cmd_info(dev: &GeForce3) -> String {
    let pci = dev.pci();
    let id = pci.vendor_device_id();
    let class = pci.class_code();
    let mut out = String::new();
    let _ = writeln!(out, "model:    {} ({})", dev.model(), dev.model().product_name());
    let _ = writeln!(
        out,
        "pci:      {:04x}:{:04x} rev {:02x} class {:02x}{:02x}{:02x}",
        id.vendor_id, id.device_id, class.revision_id, class.class, class.subclass, class.prog_if
    );
    let _ = writeln!(out, "boot0:    {:#010x}", dev.regs().boot0());
    for (name, index) in [("mmio", BAR_MMIO), ("vram", BAR_VRAM), ("crtc", BAR_CRTC)] {
        if let Some(def) = pci.bar_definition(index) {
            let _ = writeln!(
                out,
                "bar{index}:     {name} {:#x} bytes{}",
                def.size,
                if def.prefetchable { " prefetchable" } else { "" }
            );
        }
    }
    if let Some(rom) = pci.rom_range() {
        let _ = writeln!(out, "rom:      {:#x} bytes", rom.size);
    }
    if let Some((w, h)) = dev.edid().preferred_resolution() {
        let _ = writeln!(out, "edid:     {} bytes, preferred {w}x{h}", dev.edid().len());
    }
    out
}

fn run(cli: Cli) -> Result<()> {
    let mut dev = build_device(&cli.device)?;
    match cli.command {
        Command::Info => print!("{}", cmd_info(&dev)),
        Command::Edid { width, height } => {
            if let (Some(w), Some(h)) = (width, height) {
                resize(&mut dev, w, h)?;
            }
            let len = dev.edid().len();
            let bytes = read_edid_over_ddc(&mut dev, len);
            if bytes != dev.edid().as_bytes() {
                bail!("EDID read over DDC does not match the generated image");
            }
            print!("{}", hex_dump(&bytes));
        }
        Command::Modeset {
            width,
            height,
            bpp,
            virt_width,
            virt_height,
            banked,
        } => {
            vbe_write(&mut dev, VBE_DISPI_INDEX_XRES, width);
            vbe_write(&mut dev, VBE_DISPI_INDEX_YRES, height);
            vbe_write(&mut dev, VBE_DISPI_INDEX_BPP, bpp);
            if let Some(v) = virt_width {
                vbe_write(&mut dev, VBE_DISPI_INDEX_VIRT_WIDTH, v);
            }
            if let Some(v) = virt_height {
                vbe_write(&mut dev, VBE_DISPI_INDEX_VIRT_HEIGHT, v);
            }
            let mut enable = VbeEnable::ENABLED;
            if !banked {
                enable |= VbeEnable::LFB_ENABLED;
            }
            vbe_write(&mut dev, VBE_DISPI_INDEX_ENABLE, enable.bits());

            let Some(mode) = dev.vbe().mode() else {
                let regs = dev.vbe().regs();
                bail!(
                    "mode {width}x{height}x{bpp} rejected; fell back to {}x{}x{}",
                    regs.xres,
                    regs.yres,
                    regs.bpp
                );
            };
            println!(
                "accepted {}x{}x{} virtual {}x{} pitch {} {}",
                mode.width,
                mode.height,
                mode.bpp,
                mode.virt_width,
                mode.virt_height,
                mode.line_pitch,
                if mode.lfb { "linear" } else { "banked" }
            );
        }
        Command::Snapshot { out, width, height } => {
            if let (Some(w), Some(h)) = (width, height) {
                resize(&mut dev, w, h)?;
            }
            let bytes = dev.save_snapshot().encode();
            fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
            info!(path = %out.display(), len = bytes.len(), "snapshot written");
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
