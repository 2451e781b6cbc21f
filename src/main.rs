use std::env;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use chrono::Days;
use chrono::NaiveDate;
use ndarray::Array2;
use portfolio_lab::GovernanceFlags;
use portfolio_lab::PipelineInputs;
use portfolio_lab::RunContext;
use portfolio_lab::Thresholds;
use portfolio_lab::artifacts::ArtifactWriter;
use portfolio_lab::panel::ReturnPanel;
use portfolio_lab::run_pipeline;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::Normal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
  if env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
    builder.json().init();
  } else {
    builder.init();
  }
}

/// One common driver plus idiosyncratic noise, ten instruments over three years of business days.
fn synthetic_panel(seed: u64) -> Result<ReturnPanel> {
  let (t, n) = (756, 10);
  let mut rng = StdRng::seed_from_u64(seed);
  let common = Normal::new(0.0002, 0.008)?;
  let idio = Normal::new(0.0, 0.006)?;
  let start = NaiveDate::from_ymd_opt(2021, 1, 4).context("invalid start date")?;

  let dates: Vec<NaiveDate> = (0..t as u64)
    .map(|i| start.checked_add_days(Days::new(i)).context("date overflow"))
    .collect::<Result<_>>()?;
  let instruments: Vec<String> = (0..n).map(|j| format!("ETF{:02}", j + 1)).collect();
  let mut returns = Array2::zeros((t, n));
  for mut row in returns.rows_mut() {
    let m = common.sample(&mut rng);
    for (j, r) in row.iter_mut().enumerate() {
      let beta = 0.5 + 0.1 * j as f64;
      *r = beta * m + idio.sample(&mut rng);
    }
  }
  Ok(ReturnPanel::new(dates, instruments, returns)?)
}

fn main() -> Result<()> {
  init_logging();
  let args: Vec<String> = env::args().skip(1).collect();

  let ctx = match args.first() {
    Some(path) => RunContext::from_toml_file(Path::new(path)).with_context(|| format!("loading {path}"))?,
    None => RunContext::new(42, Thresholds::default(), "artifacts")?,
  };
  let panel = match args.get(1) {
    Some(path) => ReturnPanel::from_csv(Path::new(path)).with_context(|| format!("reading {path}"))?,
    None => synthetic_panel(ctx.seed())?,
  };
  info!(
    seed = ctx.seed(),
    observations = panel.n_obs(),
    instruments = panel.n_assets(),
    output = %ctx.output_dir().display(),
    "starting run"
  );

  let mut inputs = PipelineInputs::new(panel);
  inputs.run_ablation = env::var("ABLATION").is_ok_and(|v| v == "1");
  let writer = ArtifactWriter::new(&ctx);
  let out = run_pipeline(&inputs, &ctx, &GovernanceFlags::default(), Some(&writer))?;

  println!("{}", out.robustness.summary_table());
  for (metric, value) in &out.downstream.metrics {
    println!("{metric:>14}: {value:.4}");
  }
  Ok(())
}
