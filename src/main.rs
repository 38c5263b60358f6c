//! Antigenic cartography command-line tool.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use antigenic_cartography::chart::{DodgyTiterIsRegular, Method, RelaxOptions};
use antigenic_cartography::column_bases::parse_minimum_column_basis;
use antigenic_cartography::{ace, common, grid_test, optimize, serum_circle, serum_coverage, stress, table_distances};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Antigenic cartography chart relaxation and analysis",
    long_about = "Builds, relaxes, and inspects antigenic maps from HI/neut titer tables"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Multi-start relaxation from scratch.
    Relax(RelaxArgs),
    /// Grid test a chart's best projection for trapped/hemisphering points.
    GridTest(GridTestArgs),
    /// Compute a serum's protection radius.
    SerumCircle(SerumCircleArgs),
    /// Compute a serum's coverage against a homologous titer.
    SerumCoverage(SerumCoverageArgs),
}

#[derive(Debug, ClapArgs)]
struct RelaxArgs {
    /// Input `.ace` file.
    input: PathBuf,
    /// Output `.ace` file.
    output: PathBuf,
    /// Number of optimization starts.
    #[arg(long, default_value_t = 100)]
    number_of_optimizations: usize,
    /// Number of dimensions of the final projection.
    #[arg(long, default_value_t = 2)]
    dimensions: usize,
    /// Minimum column basis (e.g. "none", "1280", or a bare number).
    #[arg(long, default_value = "none")]
    minimum_column_basis: String,
    /// Disable PCA dimension annealing.
    #[arg(long)]
    no_dimension_annealing: bool,
    /// Use conjugate gradient instead of L-BFGS.
    #[arg(long)]
    conjugate_gradient: bool,
    /// Seed for the layout randomizer (reproducible runs).
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, ClapArgs)]
struct GridTestArgs {
    /// Input `.ace` file (its best projection is tested).
    input: PathBuf,
    /// Grid step, in map units.
    #[arg(long, default_value_t = grid_test::DEFAULT_GRID_STEP)]
    grid_step: f64,
}

#[derive(Debug, ClapArgs)]
struct SerumCircleArgs {
    /// Input `.ace` file.
    input: PathBuf,
    /// Serum index (0-based).
    serum: usize,
    /// Homologous antigen index (0-based).
    homologous_antigen: usize,
    /// Fold drop still considered protective.
    #[arg(long, default_value_t = serum_circle::DEFAULT_FOLD)]
    fold: f64,
    /// Use the theoretical radius instead of the empirical one.
    #[arg(long)]
    theoretical: bool,
}

#[derive(Debug, ClapArgs)]
struct SerumCoverageArgs {
    /// Input `.ace` file.
    input: PathBuf,
    /// Serum index (0-based).
    serum: usize,
    /// Homologous antigen index (0-based).
    homologous_antigen: usize,
    /// Fold drop still considered protective.
    #[arg(long, default_value_t = serum_circle::DEFAULT_FOLD)]
    fold: f64,
}

fn run_relax(args: &RelaxArgs) -> Result<(), anyhow::Error> {
    let input = fs::read_to_string(&args.input)?;
    let mut chart = ace::from_str(&input)?;

    let mcb = parse_minimum_column_basis(&args.minimum_column_basis)?;
    let options = RelaxOptions {
        method: if args.conjugate_gradient { Method::CgPca } else { Method::LbfgsPca },
        dimension_annealing: !args.no_dimension_annealing,
        disconnect_having_few_numeric_titers: false,
        dodgy_titer_is_regular: DodgyTiterIsRegular::No,
        num_threads: None,
        seed: args.seed,
    };

    tracing::info!(
        starts = args.number_of_optimizations,
        dims = args.dimensions,
        "relaxing chart"
    );
    chart.relax(
        args.number_of_optimizations,
        mcb,
        args.dimensions,
        &options,
        HashSet::new(),
        HashSet::new(),
    )?;

    if let Some(best) = chart.projections.best() {
        tracing::info!(stress = best.stress(), "best projection found");
    }

    fs::write(&args.output, ace::to_string(&chart)?)?;
    Ok(())
}

fn run_grid_test(args: &GridTestArgs) -> Result<(), anyhow::Error> {
    let input = fs::read_to_string(&args.input)?;
    let chart = ace::from_str(&input)?;
    let best = chart
        .projections
        .best()
        .ok_or_else(|| anyhow::anyhow!("chart has no projections to test"))?;

    let column_bases = chart.column_bases(best.minimum_column_basis());
    let avidity_adjusts = table_distances::AvidityAdjusts::none(chart.number_of_points());
    let table_distances = table_distances::TableDistances::compute(
        &chart.titers,
        &column_bases,
        &avidity_adjusts,
        best.dodgy_titer_is_regular(),
        best.disconnected(),
    );
    let stress = stress::Stress::new(
        table_distances,
        chart.number_of_points(),
        best.num_dims(),
        best.unmovable().clone(),
        best.unmovable_in_last_dimension().clone(),
    );

    let mut excluded = best.disconnected().clone();
    excluded.extend(best.unmovable().iter().copied());
    let optimizer = optimize::LbfgsPca::default();
    let result = grid_test::run(&stress, best.layout(), &excluded, &optimizer, grid_test::DEFAULT_GRID_STEP);

    for (point, outcome) in result.results.iter().enumerate() {
        println!("{point}: {outcome:?}");
    }
    Ok(())
}

fn run_serum_circle(args: &SerumCircleArgs) -> Result<(), anyhow::Error> {
    let input = fs::read_to_string(&args.input)?;
    let chart = ace::from_str(&input)?;
    let best = chart
        .projections
        .best()
        .ok_or_else(|| anyhow::anyhow!("chart has no projections"))?;
    let column_bases = chart.column_bases(best.minimum_column_basis());

    let result = if args.theoretical {
        serum_circle::theoretical(&chart.titers, &column_bases, args.serum, args.homologous_antigen, args.fold)
    } else {
        serum_circle::empirical(
            &chart.titers,
            &column_bases,
            best.layout(),
            args.serum,
            args.homologous_antigen,
            args.fold,
        )
    };

    match result {
        Ok(radius) => println!("radius: {radius:.4}"),
        Err(failure) => println!("not calculated: {failure:?}"),
    }
    Ok(())
}

fn run_serum_coverage(args: &SerumCoverageArgs) -> Result<(), anyhow::Error> {
    let input = fs::read_to_string(&args.input)?;
    let chart = ace::from_str(&input)?;
    let homologous_titer = chart.titers.titer(args.homologous_antigen, args.serum);
    let coverage = serum_coverage::compute(&chart.titers, args.serum, homologous_titer, args.fold)?;
    if coverage.within.is_empty() {
        tracing::warn!("no antigens fall within the homologous titer's coverage");
    }
    println!("within: {:?}", coverage.within);
    println!("outside: {:?}", coverage.outside);
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    common::setup_tracing(&cli.common.verbose);

    match &cli.command {
        Commands::Relax(args) => run_relax(args),
        Commands::GridTest(args) => run_grid_test(args),
        Commands::SerumCircle(args) => run_serum_circle(args),
        Commands::SerumCoverage(args) => run_serum_coverage(args),
    }
}
