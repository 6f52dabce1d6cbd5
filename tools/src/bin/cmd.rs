// Command line utility for inferring cluster lineages and pseudotime from a cell embedding table

use anyhow::{bail, format_err, Context, Error};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use env_logger::Env;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use serde::Serialize;
use std::fs::{create_dir_all, remove_dir, remove_file, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use traj_rs::{run_pipeline, PipelineConfig, RootSelection, TrajectoryReport};
use traj_types::{CellRecord, ClusterColor, PseudotimeRow};

const CELL_ID_COLUMN: &str = "cell_id";
const CLUSTER_COLUMN: &str = "cluster";

// RColorBrewer Set1
const DEFAULT_PALETTE: [&str; 9] = [
    "#E41A1C", "#377EB8", "#4DAF4A", "#984EA3", "#FF7F00", "#FFFF33", "#A65628", "#F781BF", "#999999",
];

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let opts = Options::from_matches(&matches)?;
    let records = load_cells(&opts.input)?;
    info!("read {} cells from {}", records.len(), opts.input.display());

    // everything is computed before the output directory is touched
    let outputs = compute(&records, &opts)?;
    write_outputs(&outputs, &opts.out_dir)?;
    info!("wrote results to {}", opts.out_dir.display());
    Ok(())
}

fn cli() -> Command {
    Command::new("traj-rs-cmd")
        .about("Infer cluster lineages and pseudotime from a cell embedding table")
        .arg(
            Arg::new("INPUT")
                .help("CSV (optionally gzipped) with cell_id, cluster and embedding coordinate columns")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ROOT")
                .help("Label of the root cluster, defaults to the largest cluster")
                .short('r')
                .long("root"),
        )
        .arg(
            Arg::new("END")
                .help("Label of a cluster forced to be a lineage end point, may be repeated")
                .short('e')
                .long("end")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("PALETTE")
                .help("Comma separated colors, assigned to clusters in label order")
                .long("palette")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("SAMPLE_FRACTION")
                .help("Also write a random subsample of the pseudotime table, fraction in (0, 1]")
                .long("sample_fraction")
                .requires("SEED")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("SEED")
                .help("Seed for the subsample, required with --sample_fraction")
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
}

struct Options {
    input: PathBuf,
    out_dir: PathBuf,
    config: PipelineConfig,
    palette: Vec<String>,
    // fraction and seed
    sample: Option<(f64, u64)>,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Result<Options, Error> {
        let input = matches.get_one::<PathBuf>("INPUT").context("missing INPUT")?.clone();
        let out_dir = matches.get_one::<PathBuf>("OUT_DIR").context("missing OUT_DIR")?.clone();
        let root = match matches.get_one::<String>("ROOT") {
            Some(label) => RootSelection::Label(label.clone()),
            None => RootSelection::LargestCluster,
        };
        let end_clusters = matches
            .get_many::<String>("END")
            .map(|v| v.cloned().collect())
            .unwrap_or_default();
        let palette = matches
            .get_many::<String>("PALETTE")
            .map(|v| v.map(|c| c.trim().to_string()).collect())
            .unwrap_or_else(|| DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect());

        let sample = match matches.get_one::<f64>("SAMPLE_FRACTION") {
            Some(&fraction) => {
                let seed = matches
                    .get_one::<u64>("SEED")
                    .context("--sample_fraction needs an explicit --seed")?;
                Some((fraction, *seed))
            }
            None => None,
        };

        Ok(Options {
            input,
            out_dir,
            config: PipelineConfig { root, end_clusters },
            palette,
            sample,
        })
    }
}

/// Load cells from a CSV file, decompressing `.gz` files
pub fn load_cells(path: impl AsRef<Path>) -> Result<Vec<CellRecord>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    read_cells(reader).with_context(|| path.display().to_string())
}

/// Parse cell records. Every column other than `cell_id` and `cluster` is an embedding
/// coordinate, in header order. An empty cluster value is a missing label.
pub fn read_cells<R: Read>(reader: R) -> Result<Vec<CellRecord>, Error> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| format_err!("no '{}' column", name))
    };
    let id_col = column(CELL_ID_COLUMN)?;
    let cluster_col = column(CLUSTER_COLUMN)?;
    let coord_cols = (0..headers.len())
        .filter(|&i| i != id_col && i != cluster_col)
        .collect::<Vec<_>>();
    if coord_cols.is_empty() {
        bail!("no embedding columns besides '{}' and '{}'", CELL_ID_COLUMN, CLUSTER_COLUMN);
    }

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let rec = result.with_context(|| format!("reading row {}", row + 1))?;
        let cell_id = rec.get(id_col).unwrap_or_default().to_string();
        let label = rec.get(cluster_col).filter(|l| !l.is_empty()).map(str::to_string);
        let embedding = coord_cols
            .iter()
            .map(|&c| {
                let v = rec.get(c).unwrap_or_default();
                v.parse::<f64>()
                    .with_context(|| format!("cell '{}': bad value '{}' in column '{}'", cell_id, v, &headers[c]))
            })
            .collect::<Result<Vec<_>, _>>()?;
        records.push(CellRecord {
            cell_id,
            embedding,
            label,
        });
    }
    Ok(records)
}

struct Outputs {
    report: TrajectoryReport,
    colors: Vec<ClusterColor>,
    sample: Option<Vec<PseudotimeRow>>,
}

fn compute(records: &[CellRecord], opts: &Options) -> Result<Outputs, Error> {
    let traj = run_pipeline(records, &opts.config)?;
    let report = traj.report();
    let colors = report.colors_for_clusters(&opts.palette)?;
    let sample = opts
        .sample
        .map(|(fraction, seed)| report.sample(fraction, seed))
        .transpose()?;
    Ok(Outputs {
        report: report.clone(),
        colors,
        sample,
    })
}

/// Write every output file, or none: files written before a failure are removed again, as is
/// `out_dir` when this call created it.
fn write_outputs(outputs: &Outputs, out_dir: &Path) -> Result<(), Error> {
    let created = !out_dir.exists();
    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;

    let mut written = Vec::new();
    let result = write_files(outputs, out_dir, &mut written);
    if result.is_err() {
        for path in written.iter().filter(|p| p.is_file()) {
            if let Err(e) = remove_file(path) {
                warn!("could not remove {}: {}", path.display(), e);
            }
        }
        if created {
            remove_dir(out_dir).ok();
        }
    }
    result
}

fn write_files(outputs: &Outputs, out_dir: &Path, written: &mut Vec<PathBuf>) -> Result<(), Error> {
    let mut target = |name: &str| {
        let path = out_dir.join(name);
        written.push(path.clone());
        path
    };

    write_json(outputs.report.lineages(), target("lineages.json"))?;
    write_json(outputs.report.cluster_summaries(), target("clusters.json"))?;
    write_csv_gz(outputs.report.rows(), target("pseudotime.csv.gz"))?;
    if let Some(sample) = &outputs.sample {
        write_csv_gz(sample, target("pseudotime_sample.csv.gz"))?;
    }

    let path = target("cluster_colors.csv");
    let file = File::create(&path).with_context(|| path.display().to_string())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for color in &outputs.colors {
        writer.serialize(color)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path).with_context(|| path.display().to_string())?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_csv_gz<T: Serialize>(rows: &[T], path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut writer = csv::Writer::from_writer(GzEncoder::new(BufWriter::new(file), Compression::default()));
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    let gz = writer.into_inner().map_err(|e| format_err!("{}", e.error()))?;
    gz.finish()?.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_out_dir() -> PathBuf {
        let id = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("traj_rs_cmd_{}_{}", std::process::id(), id))
    }

    const CELLS: &str = "\
cell_id,PC_1,PC_2,cluster
AAAC-1,0.0,0.0,A
AAAG-1,0.0,1.0,A
AACT-1,5.0,0.0,B
AAGT-1, 5.0 ,1.0,B
";

    fn options(out_dir: PathBuf) -> Options {
        Options {
            input: PathBuf::from("cells.csv"),
            out_dir,
            config: PipelineConfig::default().with_root("A"),
            palette: vec!["#000000".to_string()],
            sample: Some((0.5, 42)),
        }
    }

    #[test]
    fn test_read_cells() {
        let csv = "PC_1,cluster,cell_id,PC_2\n1.5,A,c0,2.5\n3.0,,c1,4.0\n";
        let records = read_cells(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cell_id, "c0");
        assert_eq!(records[0].embedding, vec![1.5, 2.5]);
        assert_eq!(records[0].label.as_deref(), Some("A"));
        assert_eq!(records[1].label, None);

        let records = read_cells(CELLS.as_bytes()).unwrap();
        assert_eq!(records[3].embedding, vec![5.0, 1.0]);
    }

    #[test]
    fn test_read_cells_errors() {
        assert!(read_cells("cell_id,PC_1\nc0,1.0\n".as_bytes()).is_err());
        assert!(read_cells("cell_id,cluster\nc0,A\n".as_bytes()).is_err());
        assert!(read_cells("cell_id,PC_1,cluster\nc0,x,A\n".as_bytes()).is_err());
        assert!(read_cells("cell_id,PC_1,cluster\nc0,1.0\n".as_bytes()).is_err());
    }

    #[test]
    fn test_options() {
        let matches = cli()
            .try_get_matches_from([
                "traj-rs-cmd",
                "cells.csv",
                "--end",
                "k2",
                "-e",
                "k3",
                "--palette",
                "red, blue",
                "--root",
                "k0",
            ])
            .unwrap();
        let opts = Options::from_matches(&matches).unwrap();
        assert_eq!(opts.input, PathBuf::from("cells.csv"));
        assert_eq!(opts.out_dir, PathBuf::from("."));
        assert_eq!(opts.config.root, RootSelection::Label("k0".to_string()));
        assert_eq!(opts.config.end_clusters, vec!["k2", "k3"]);
        assert_eq!(opts.palette, vec!["red", "blue"]);
        assert_eq!(opts.sample, None);

        let matches = cli().try_get_matches_from(["traj-rs-cmd", "cells.csv"]).unwrap();
        let opts = Options::from_matches(&matches).unwrap();
        assert_eq!(opts.config, PipelineConfig::default());
        assert_eq!(opts.palette.len(), DEFAULT_PALETTE.len());
    }

    #[test]
    fn test_sample_needs_seed() {
        assert!(cli()
            .try_get_matches_from(["traj-rs-cmd", "cells.csv", "--sample_fraction", "0.5"])
            .is_err());

        let matches = cli()
            .try_get_matches_from(["traj-rs-cmd", "cells.csv", "--sample_fraction", "0.5", "--seed", "7"])
            .unwrap();
        let opts = Options::from_matches(&matches).unwrap();
        assert_eq!(opts.sample, Some((0.5, 7)));
    }

    #[test]
    fn test_write_outputs() {
        let out_dir = temp_out_dir();
        let records = read_cells(CELLS.as_bytes()).unwrap();
        let outputs = compute(&records, &options(out_dir.clone())).unwrap();
        write_outputs(&outputs, &out_dir).unwrap();

        let gz = BufReader::new(File::open(out_dir.join("pseudotime.csv.gz")).unwrap());
        let mut rdr = csv::Reader::from_reader(MultiGzDecoder::new(gz));
        let rows = rdr
            .deserialize::<PseudotimeRow>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows, outputs.report.rows());
        assert!(out_dir.join("pseudotime_sample.csv.gz").exists());

        let lineages: Vec<traj_types::LineageRecord> =
            serde_json::from_reader(File::open(out_dir.join("lineages.json")).unwrap()).unwrap();
        assert_eq!(lineages[0].clusters, vec!["A", "B"]);

        let colors = std::fs::read_to_string(out_dir.join("cluster_colors.csv")).unwrap();
        assert_eq!(colors, "cluster,color\nA,#000000\nB,#000000\n");

        std::fs::remove_dir_all(&out_dir).unwrap();
    }

    #[test]
    fn test_failed_run_has_no_outputs() {
        let records = read_cells("cell_id,PC_1,cluster\nc0,1.0,A\nc1,2.0,A\n".as_bytes()).unwrap();
        let out_dir = temp_out_dir();
        assert!(compute(&records, &options(out_dir.clone())).is_err());
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_failed_write_removes_outputs() {
        let out_dir = temp_out_dir();
        let records = read_cells(CELLS.as_bytes()).unwrap();
        let outputs = compute(&records, &options(out_dir.clone())).unwrap();

        // a directory in the way of the third file
        std::fs::create_dir_all(out_dir.join("pseudotime.csv.gz")).unwrap();
        assert!(write_outputs(&outputs, &out_dir).is_err());
        assert!(!out_dir.join("lineages.json").exists());
        assert!(!out_dir.join("clusters.json").exists());
        assert!(!out_dir.join("cluster_colors.csv").exists());
        assert!(out_dir.join("pseudotime.csv.gz").is_dir());

        std::fs::remove_dir_all(&out_dir).unwrap();
    }
}
