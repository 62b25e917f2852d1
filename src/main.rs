/// Put all the stages together: load the tables, impute, compare the win models, and write predictions.
use std::error::Error;

use clap::Parser;
use plotters::prelude::*;

mod error;
mod impute;
mod io;
mod model;
mod outliers;
mod partition;
mod pipeline;
mod preprocess;

use pipeline::{run, Config};
use preprocess::StrikeoutGroup;

#[derive(Debug, Parser)]
#[command(name = "moneyball_wins", about = "Impute team-season stats and predict season win totals")]
struct Args {
    /// Labelled training table (path or http(s) URL).
    #[arg(long, default_value = "moneyball-training-data.csv")]
    train: String,

    /// Evaluation table to predict (path or http(s) URL).
    #[arg(long, default_value = "moneyball-evaluation-data.csv")]
    eval: String,

    /// Output csv: the evaluation table plus PREDICTED_WINS.
    #[arg(long, default_value = "predictions.csv")]
    out: String,

    #[arg(long, default_value_t = 0.8)]
    train_fraction: f64,

    /// Outlier screening upper percentile.
    #[arg(long, default_value_t = 0.97)]
    upper_percentile: f64,

    /// Outlier screening lower percentile.
    #[arg(long, default_value_t = 0.03)]
    lower_percentile: f64,

    /// Imputation rounds per missing cell.
    #[arg(long, default_value_t = 5)]
    rounds: usize,

    /// Seed for the train/test split and the imputation draws.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Strikeout group for rows whose group cannot be derived (high, med_high, med_low, low).
    #[arg(long, default_value = "high")]
    fallback_group: StrikeoutGroup,

    /// Also draw the selected model's coefficients to coefficients.png.
    #[arg(long)]
    plot: bool,
}

impl From<Args> for Config {
    fn from(a: Args) -> Self {
        Config {
            train_src: a.train,
            eval_src: a.eval,
            out_path: a.out,
            train_fraction: a.train_fraction,
            upper_percentile: a.upper_percentile,
            lower_percentile: a.lower_percentile,
            rounds: a.rounds,
            seed: a.seed,
            fallback_group: a.fallback_group,
        }
    }
}

/// Draws a horizontal bar chart of model coefficients and saves it to `path`
/// input: feature names with their coefficients
/// output: none (writes the PNG)
/// logic: split into names and values; compute X-axis range; build Cartesian chart;
/// label Y ticks with feature names; draw one bar per coefficient
fn plot_coefficients(results: &[(String, f64)], path: &str) -> Result<(), Box<dyn Error>> {
    let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
    let coefs: Vec<f64> = results.iter().map(|(_, c)| *c).collect();
    let count = results.len();

    // Symmetric padding; a flat chart still needs a non-empty range
    let min_x = coefs.iter().cloned().fold(0.0_f64, f64::min);
    let max_x = coefs.iter().cloned().fold(0.0_f64, f64::max);
    let pad = ((max_x - min_x) * 0.1).max(1e-6);
    let x_range = (min_x - pad)..(max_x + pad);

    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Win Model Coefficients", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(200)
        .build_cartesian_2d(x_range, 0..count)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(count)
        .y_label_formatter(&|idx| names.get(*idx).map(|n| n.to_string()).unwrap_or_default())
        .x_desc("Coefficient")
        .y_desc("Feature")
        .draw()?;

    chart.draw_series(coefs.iter().enumerate().map(|(i, &coef)| {
        let start = 0.0_f64.min(coef);
        let end = 0.0_f64.max(coef);
        Rectangle::new([(start, i), (end, i + 1)], BLUE.mix(0.5).filled())
    }))?;

    root.present()?;
    Ok(())
}

/// load both tables, compare models, predict the evaluation table
/// input: command-line flags (see `Args`)
/// output: predictions csv, optional coefficients.png, RMSE table on stdout
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let plot = args.plot;
    let config = Config::from(args);
    println!("Loading training data from {}...", config.train_src);

    let summary = run(&config)?;

    println!("\nHeld-out RMSE (n - k - 1):");
    for e in &summary.evaluations {
        let mark = if e.name == summary.selected.name { "*" } else { " " };
        println!("{} {:<24} {:>8.3}", mark, e.name, e.rmse);
    }

    let coefs = summary.model.named_coefficients();
    println!(
        "\nCoefficients ({}, residual df {}):",
        summary.selected.name,
        summary.model.residual_df()
    );
    for (name, coef) in &coefs {
        println!("{:<30} {:>10.4}", name, coef);
    }
    println!(
        "\nWrote {} predictions to {}",
        summary.predictions.len(),
        config.out_path
    );

    if plot {
        plot_coefficients(&coefs, "coefficients.png")?;
        println!("Wrote coefficients.png");
    }

    Ok(())
}
