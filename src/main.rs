use clap::Parser;
use lrfix::output::{FastaWriter, QvWriter};
use lrfix::overlaps::OverlapDumpReader;
use lrfix::read_db::ReadDb;
use lrfix::repair::{self, RepairConfig};
use lrfix::tracks::TrackSet;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter};

/// Repairs gaps and weak regions based on a read's overlaps and produces a
/// new set of sequences.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Read database (FASTA); tracks live next to it as <db>.<name>.track
    db: String,

    /// Overlap dump, grouped by A-read
    overlaps: String,

    /// Output FASTA for patched sequences
    output: String,

    /// Min length for fixed sequences
    #[clap(short = 'x', default_value_t = 1000)]
    min_length: i32,

    /// Segment quality threshold; a segment with quality 0 or >= this is bad
    #[clap(short = 'Q', default_value_t = 28)]
    quality_cutoff: u16,

    /// Max gap length for patching
    #[clap(short = 'g', default_value_t = 500)]
    max_gap: i32,

    /// Patch quality streams from <db>.qvs into this file
    #[clap(short = 'q')]
    quality_out: Option<String>,

    /// Trim reads based on this track
    #[clap(short = 't')]
    trim_track: Option<String>,

    /// Convert the intervals of this track onto the patched reads (repeatable)
    #[clap(short = 'c')]
    convert_tracks: Vec<String>,
}

fn run(args: &Args) -> io::Result<()> {
    let mut dump = OverlapDumpReader::from_path(&args.overlaps)?;
    let twidth = dump.twidth();

    let mut db = ReadDb::from_fasta(&args.db)?;
    if args.quality_out.is_some() {
        db.load_qv_streams(&ReadDb::qv_path(&args.db))?;
    }
    info!("{} reads, segment width {}", db.len(), twidth);

    let tracks = TrackSet::load(
        &args.db,
        &db,
        twidth,
        args.trim_track.as_deref(),
        &args.convert_tracks,
    )?;

    let groups = dump.collect_groups().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse overlap dump '{}': {}", args.overlaps, e),
        )
    })?;

    let fasta_file = File::create(&args.output).map_err(|e| {
        io::Error::new(e.kind(), format!("Failed to create '{}': {}", args.output, e))
    })?;
    let mut fasta = FastaWriter::new(BufWriter::new(fasta_file));

    let mut qv = match &args.quality_out {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                io::Error::new(e.kind(), format!("Failed to create '{}': {}", path, e))
            })?;
            Some(QvWriter::new(BufWriter::new(file)))
        }
        None => None,
    };

    let cfg = RepairConfig {
        minlen: args.min_length,
        lowq: args.quality_cutoff,
        maxgap: args.max_gap,
        with_qvs: args.quality_out.is_some(),
    };

    repair::run_pass(&db, &tracks, &cfg, twidth, &groups, &mut fasta, qv.as_mut())?;
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
