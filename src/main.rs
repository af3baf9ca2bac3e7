use clap::{Parser, Subcommand};
use dedupimg::cd::SECTOR_SIZE;
use dedupimg::codec::compression_name;
use dedupimg::media::{MediaType, Track, TrackType};
use dedupimg::recovery::{scan_file, BlockHealth};
use dedupimg::{CreateOptions, Image};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dedupimg", about = "Deduplicated disk image container CLI")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show image header, media description and digests
    Info {
        input: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the stored CRC64 of every Data and DDT block
    Verify {
        input: PathBuf,
    },
    /// Walk blocks without the index and report damage
    Scan {
        input: PathBuf,
    },
    /// Convert a raw sector dump into an image
    Convert {
        input:  PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// hdd, flash, cdrom, cdda, dvdrom, ... (default: hdd, or cdrom with --long)
        #[arg(long)]
        media_type: Option<String>,
        /// Bytes per sector of the input (ignored with --long and on CD media)
        #[arg(long, default_value = "512")]
        sector_size: u32,
        /// Input holds raw 2352-byte CD sectors
        #[arg(long)]
        long: bool,
        /// Track type of the single track on CD media: audio, mode1, mode2, ...
        #[arg(long, default_value = "mode1")]
        track_type: String,
        /// Creation option as key=value (repeatable); `dictionary` is accepted but has no effect
        #[arg(short = 'O', long = "option")]
        options: Vec<String>,
    },
    /// Write the sectors of an image back out as a raw dump
    Extract {
        input:  PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Write raw 2352-byte sectors
        #[arg(long)]
        long: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let img = Image::open_path(&input)?;
            let info = img.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            println!("── Image ────────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Application    {} {}", info.application, info.application_version);
            println!("  Format version {}", info.format_version);
            println!("  Media type     {}", info.media_type_name);
            println!("  Created        {}", info.creation_time);
            println!("  Last written   {}", info.last_written_time);
            println!("  Sectors        {}", info.sectors);
            println!("  Sector size    {} B", info.sector_size);
            println!("  Block capacity {} sectors", info.sectors_per_block);
            println!("  DDT            {}", if info.ddt_on_disk { "on disk" } else { "in memory" });
            println!("  Blocks         {}", info.blocks);
            println!("  LZMA dict      encoder default (dictionary option not applied)");
            println!("  Raw CD data    {}", info.has_raw_cd_data);
            println!("  Subchannel     {}", info.has_subchannel);
            if let Some(g) = info.geometry {
                println!("  Geometry       {}/{}/{} (C/H/S)", g.cylinders, g.heads, g.sectors_per_track);
            }
            if !info.tracks.is_empty() {
                println!("  Tracks ({}):", info.tracks.len());
                for t in &info.tracks {
                    println!("    {:>2}  {:<16} {:>8} - {:<8}", t.sequence, format!("{:?}", t.track_type), t.start, t.end);
                }
            }
            if !info.media_tags.is_empty() {
                println!("  Media tags ({}):", info.media_tags.len());
                for kind in &info.media_tags {
                    println!("    {kind}");
                }
            }
            if !info.checksums.is_empty() {
                println!("  Checksums:");
                for c in &info.checksums {
                    println!("    {:<8} {}", c.algorithm.name(), c.display_value());
                }
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let mut img = Image::open_path(&input)?;
            let report = img.verify()?;
            for f in &report.failures {
                println!("  FAIL  offset {:>12}  {} {}  {:?}", f.offset, f.kind, f.data_kind, f.problem);
            }
            println!("Checked {} block(s), {} failure(s)", report.checked, report.failures.len());
            if !report.is_ok() {
                return Err(format!("{} block(s) failed verification", report.failures.len()).into());
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input } => {
            let report = scan_file(&input)?;
            for b in report.blocks.iter().filter(|b| !b.health.is_healthy()) {
                match b.health {
                    BlockHealth::UnknownCompression(code) => println!(
                        "  offset {:>12}  {} {}  compression {}",
                        b.offset, b.kind, b.data_kind, compression_name(code)
                    ),
                    _ => println!("  offset {:>12}  {} {}  {:?}", b.offset, b.kind, b.data_kind, b.health),
                }
            }
            for g in &report.garbage {
                println!("  offset {:>12}  {} unrecognised byte(s)", g.offset, g.length);
            }
            println!("{}", report.summary());
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, media_type, sector_size, long, track_type, options } => {
            let opts = CreateOptions::from_pairs(&options)?;
            let media_type = match media_type {
                Some(name) => MediaType::from_name(&name).ok_or_else(|| format!("unknown media type '{name}'"))?,
                None if long => MediaType::CD_ROM,
                None => MediaType::GENERIC_HDD,
            };
            let track_type = TrackType::from_name(&track_type)
                .ok_or_else(|| format!("unknown track type '{track_type}'"))?;
            let (declared, unit) = sector_units(media_type, track_type, sector_size, long);
            let length = std::fs::metadata(&input)?.len();
            let sectors = length.div_ceil(unit);

            let mut img = Image::create_path(&output, media_type, opts, sectors, declared)?;
            if media_type.is_compact_disc() && sectors > 0 {
                img.set_tracks(vec![Track::new(1, track_type, 0, sectors - 1)])?;
            }

            let mut src = BufReader::new(File::open(&input)?);
            let mut buf = vec![0u8; unit as usize];
            for lba in 0..sectors {
                buf.fill(0);
                read_up_to(&mut src, &mut buf)?;
                if long {
                    img.write_sector_long(lba, &buf)?;
                } else {
                    img.write_sector(lba, &buf)?;
                }
            }
            img.close()?;
            println!("Created: {} ({} sectors of {} B)", output.display(), sectors, unit);
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output, long } => {
            let mut img = Image::open_path(&input)?;
            let mut dst = BufWriter::new(File::create(&output)?);
            for lba in 0..img.sectors() {
                let sector = if long { img.read_sector_long(lba)? } else { img.read_sector(lba)? };
                dst.write_all(&sector)?;
            }
            dst.flush()?;
            println!("Extracted {} sector(s) → {}", img.sectors(), output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Declared sector size of the image and bytes read per input sector.
fn sector_units(media_type: MediaType, track_type: TrackType, sector_size: u32, long: bool) -> (u32, u64) {
    let declared = if media_type.is_compact_disc() { track_type.user_data_size() as u32 } else { sector_size };
    let unit = if long { SECTOR_SIZE as u64 } else { declared as u64 };
    (declared, unit)
}

/// Fill as much of `buf` as the input still has; the tail stays zero.
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cd_convert_reads_user_sized_sectors() {
        assert_eq!(sector_units(MediaType::CD_ROM, TrackType::CdMode1, 512, false), (2048, 2048));
        assert_eq!(sector_units(MediaType::CD_ROM, TrackType::CdMode2Form2, 512, false), (2324, 2324));
        assert_eq!(sector_units(MediaType::CD_ROM, TrackType::CdMode1, 512, true), (2048, SECTOR_SIZE as u64));
    }

    #[test]
    fn help_marks_dictionary_as_ineffective() {
        use clap::CommandFactory;

        Cli::command().debug_assert();
        let mut cmd = Cli::command();
        let convert = cmd.find_subcommand_mut("convert").unwrap();
        assert!(convert.render_long_help().to_string().contains("has no effect"));
    }

    #[test]
    fn block_device_convert_uses_sector_size() {
        assert_eq!(sector_units(MediaType::GENERIC_HDD, TrackType::CdMode1, 4096, false), (4096, 4096));
    }
}
