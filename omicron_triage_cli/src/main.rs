use std::io;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use omicron_triage::{
    build_table, plot_path, table_path, write_table, DirectoryArchive, Params, Query,
    TableSummary,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod plot;

#[derive(Parser, Debug)]
#[command(author, version, about = "Omicron trigger table and plot builder", long_about = None)]
struct Cli {
    /// Interferometer (H1 or L1)
    #[arg(long)]
    ifo: String,

    /// Channel name, e.g. GDS_CALIB_STRAIN or LSC_REFL_A_LF_OUT_DQ
    #[arg(long)]
    channel: String,

    /// GPS start time (seconds)
    #[arg(long, allow_negative_numbers = true)]
    start: f64,

    /// GPS end time (seconds, exclusive)
    #[arg(long, allow_negative_numbers = true)]
    end: f64,

    /// Minimum SNR of selected triggers (non-negative)
    #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
    snr: f64,

    /// Plot the selected triggers
    #[arg(long, action = ArgAction::SetTrue)]
    plot: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Root of the trigger archive
    #[arg(
        long,
        env = "OMICRON_ARCHIVE_ROOT",
        default_value = "/home/detchar/triggers",
        value_hint = ValueHint::DirPath
    )]
    archive_root: PathBuf,

    /// Directory receiving the Omicron/ output folder
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Optional JSON file overriding plot parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

#[derive(Debug)]
struct RunOutcome {
    table: TableSummary,
    plot: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let outcome = run(&cli)?;
    info!(
        "Done! table {}{}",
        outcome.table.path.display(),
        outcome
            .plot
            .as_ref()
            .map(|p| format!(", plot {}", p.display()))
            .unwrap_or_default()
    );
    Ok(())
}

fn run(cli: &Cli) -> Result<RunOutcome> {
    let params = match cli.config.as_ref() {
        Some(path) => Params::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Params::default(),
    };
    let query = Query::new(&cli.ifo, &cli.channel, cli.start, cli.end, cli.snr)?;
    info!(
        "Starting! {}:{} [{}, {})",
        query.ifo(),
        query.channel(),
        query.window_start(),
        query.window_end()
    );

    let archive = DirectoryArchive::new(&cli.archive_root);
    let t_build = Instant::now();
    let (table, stats) = build_table(&archive, &query).with_context(|| {
        format!(
            "failed to collect triggers from {}",
            archive.root().display()
        )
    })?;
    info!(
        "Selected {} of {} triggers from {} fragments",
        stats.kept, stats.loaded, stats.fragments
    );
    debug!(
        "Build stage: {:.1} ms",
        t_build.elapsed().as_secs_f64() * 1000.0
    );

    info!(
        "Writing the omicron table for segment [{},{}] seconds",
        query.window_start(),
        query.window_end()
    );
    let table_file = table_path(&cli.output_dir, &query);
    let summary = write_table(&table, &table_file)
        .with_context(|| format!("failed to write {}", table_file.display()))?;
    info!(
        "Wrote trigger table: {} ({} rows)",
        summary.path.display(),
        summary.rows
    );
    debug!("Table sha256: {}", summary.sha256);

    let mut plot_file = None;
    if cli.plot {
        info!(
            "Plotting the omicron triggers of segment [{},{}] seconds",
            query.window_start(),
            query.window_end()
        );
        let png_path = plot_path(&cli.output_dir, &query);
        let t_plot = Instant::now();
        match plot::render_chart_guard(&table, &query, &params, &png_path) {
            Ok(()) => {
                info!("Wrote plot: {}", png_path.display());
                plot_file = Some(png_path);
            }
            Err(err) => warn!("Skipping PNG render ({}): {}", png_path.display(), err),
        }
        debug!(
            "Plot stage: {:.1} ms",
            t_plot.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(RunOutcome {
        table: summary,
        plot: plot_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const HEADER: &str = "time,frequency,tstart,tend,fstart,fend,snr,q,amplitude,phase";

    fn cli(root: &Path, out: &Path, extra: &[&str]) -> Cli {
        let mut args = vec![
            "omicron-triage".to_string(),
            "--ifo".into(),
            "H1".into(),
            "--channel".into(),
            "LSC_REFL_A_LF_OUT_DQ".into(),
            "--start".into(),
            "1000".into(),
            "--end".into(),
            "2000".into(),
            "--archive-root".into(),
            root.display().to_string(),
            "--output-dir".into(),
            out.display().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    fn write_fragment(root: &Path, start: i64, duration: i64, body: &str) {
        let dir = root.join("H1/LSC_REFL_A_LF_OUT_DQ_OMICRON/0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!(
                "H1-LSC_REFL_A_LF_OUT_DQ_OMICRON-{}-{}.csv",
                start, duration
            )),
            format!("{}\n{}", HEADER, body),
        )
        .unwrap();
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let cli = cli(dir.path(), dir.path(), &[]);
        assert_eq!(cli.snr, 5.0);
        assert!(!cli.plot);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run_writes_table_and_plot() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("triggers");
        write_fragment(
            &root,
            900,
            600,
            "1200,40,1199.8,1200.2,30,50,45,5.66,1e-22,0\n\
             1100,40,1099.8,1100.2,30,50,7,5.66,1e-22,0\n\
             950,40,949.8,950.2,30,50,70,5.66,1e-22,0\n",
        );
        write_fragment(&root, 1500, 600, "1600,40,1599.8,1600.2,30,50,15,5.66,1e-22,0\n");
        let out = dir.path().join("out");

        let outcome = run(&cli(&root, &out, &["--plot"])).unwrap();
        assert_eq!(outcome.table.rows, 3);
        let text = fs::read_to_string(&outcome.table.path).unwrap();
        let times: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(times, vec!["1100", "1200", "1600"]);
        assert!(outcome.table.path.ends_with(
            "Omicron/table-LSC_REFL_A_LF_OUT_DQ-snr_5d0-start_1000-end_2000.csv"
        ));
        assert!(outcome.plot.map(|p| p.exists()).unwrap_or(false));
    }

    #[test]
    fn test_run_without_data_writes_header_only() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let outcome = run(&cli(&dir.path().join("missing"), &out, &["--plot"])).unwrap();
        assert_eq!(outcome.table.rows, 0);
        assert_eq!(
            fs::read_to_string(&outcome.table.path).unwrap(),
            format!("{}\n", HEADER)
        );
        assert!(outcome.plot.is_some());
    }

    #[test]
    fn test_run_aborts_without_partial_table() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("triggers");
        write_fragment(&root, 900, 600, "1200,40,1199.8,1200.2,30,50,45,5.66,1e-22,0\n");
        write_fragment(&root, 1500, 600, "1600,forty\n");
        let out = dir.path().join("out");

        let err = run(&cli(&root, &out, &[])).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read fragment"));
        assert!(!out.join("Omicron").exists());
    }

    #[test]
    fn test_run_rejects_invalid_query_and_config() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        assert!(run(&cli(dir.path(), &out, &["--snr", "-1"])).is_err());

        let config = dir.path().join("params.json");
        fs::write(&config, r#"{ "tick_count": 0 }"#).unwrap();
        let err = run(&cli(dir.path(), &out, &["--config", config.to_str().unwrap()]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("tick_count"));
        assert!(!out.exists());
    }
}
