use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use migraplan::{
    DetectedVersion, InitialStateDetector, MigrationPlan, PlanDefinition, SemVersion, StateToken,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "plan-tool")]
#[command(about = "Developer tooling for migraplan upgrade plans")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a plan document and report its shape
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
    /// List the units a store at `--from` still has to run
    Resolve {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, default_value = "")]
        from: String,
        #[arg(long)]
        to: Option<String>,
    },
    /// Map a product version to the state a plan starts from
    Detect {
        #[arg(long)]
        version: String,
        #[arg(long)]
        floor: String,
        #[arg(long)]
        current: String,
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Print a fresh state token for a new chain step
    NewState,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { plan } => validate(&plan),
        Command::Resolve { plan, from, to } => resolve(&plan, &from, to.as_deref()),
        Command::Detect {
            version,
            floor,
            current,
            plan,
        } => detect(&version, &floor, &current, plan.as_deref()),
        Command::NewState => {
            println!("{}", StateToken::generate());
            Ok(())
        }
    }
}

fn load_plan(path: &Path) -> Result<MigrationPlan<()>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan document '{}'", path.display()))?;
    let definition = PlanDefinition::from_json(&text)?;
    let plan = definition
        .build_unbound::<()>()
        .with_context(|| format!("Plan document '{}' is invalid", path.display()))?;
    Ok(plan)
}

fn validate(path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    let units = plan
        .transitions()
        .iter()
        .filter(|transition| transition.unit().is_some())
        .count();

    println!("Plan '{}' is valid", plan.name());
    println!("  transitions: {}", plan.len());
    println!("  units:       {}", units);
    println!("  states:      {}", plan.known_states().len());
    println!("  initial:     '{}'", plan.initial_state());
    println!("  final:       '{}'", plan.final_state());
    Ok(())
}

fn resolve(path: &Path, from: &str, to: Option<&str>) -> Result<()> {
    let plan = load_plan(path)?;
    let origin = StateToken::new(from);
    let resolved = match to {
        Some(target) => plan.resolve_to(&origin, &StateToken::new(target)),
        None => plan.resolve(&origin),
    };
    let pending = resolved.with_context(|| format!("Cannot resolve plan '{}'", plan.name()))?;

    if pending.is_empty() {
        println!("'{}' is up to date", origin);
        return Ok(());
    }

    for (index, step) in pending.steps().iter().enumerate() {
        match step.unit() {
            Some(unit) => println!(
                "{:>3}. {} ('{}' -> '{}')",
                index + 1,
                unit.id(),
                step.source(),
                step.target()
            ),
            None => println!(
                "{:>3}. - ('{}' -> '{}')",
                index + 1,
                step.source(),
                step.target()
            ),
        }
    }
    println!(
        "{} unit(s) pending, ending at '{}'",
        pending.unit_count(),
        pending.final_state()
    );
    Ok(())
}

fn detect(version: &str, floor: &str, current: &str, plan: Option<&Path>) -> Result<()> {
    let floor = SemVersion::parse(floor).context("Invalid --floor")?;
    let current = SemVersion::parse(current).context("Invalid --current")?;
    if floor >= current {
        return Err(anyhow!(
            "--floor ({}) must be lower than --current ({})",
            floor,
            current
        ));
    }

    let detector = InitialStateDetector::new(floor, current);
    let detected = detector.detect_version(Some(version))?;

    match plan {
        Some(path) => {
            let plan = load_plan(path)?;
            let state = match detected {
                DetectedVersion::Legacy(state) => state,
                DetectedVersion::Current => plan.final_state().clone(),
            };
            if !plan.contains_state(&state) {
                return Err(anyhow!(
                    "Plan '{}' does not know state '{}'",
                    plan.name(),
                    state
                ));
            }
            let pending = plan.resolve(&state)?.unit_count();
            println!("{} ({} unit(s) pending)", state, pending);
        }
        None => match detected {
            DetectedVersion::Legacy(state) => println!("{}", state),
            DetectedVersion::Current => println!("up to date"),
        },
    }
    Ok(())
}
