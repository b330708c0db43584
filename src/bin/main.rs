use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anstream::println;
use clap::Parser;
use clap::ValueEnum;
use indoc::indoc;
use owo_colors::OwoColorize;
use rand_chacha::ChaCha8Rng;
use rand_chacha::rand_core::SeedableRng;
use tracing_subscriber::filter::LevelFilter;

use rts::agent::EpisodeConfig;
use rts::agent::ExperimentResult;
use rts::agent::RtsAgent;
use rts::agent::run_episode;
use rts::algorithms::ara_star::AnytimeRepairingAStar;
use rts::algorithms::lss_lrta_star::LssLrtaStar;
use rts::algorithms::lss_lrta_star::LssLrtaStarConfig;
use rts::planner::ContinuationPolicy;
use rts::planner::RealTimePlanner;
use rts::problems::grid_world::GridAction;
use rts::problems::grid_world::GridCost;
use rts::problems::grid_world::GridState;
use rts::problems::grid_world::GridWorld;
use rts::space::BackwardDomain;
use rts::termination::ExpansionTerminationChecker;
use rts::termination::TerminationChecker;
use rts::termination::TimeTerminationChecker;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    LssLrtaStar,
    AraStar,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Termination {
    /// Budget in milliseconds per planning call
    Time,
    /// Budget in node expansions per planning call
    Expansions,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Continuation {
    Warn,
    Reject,
}

impl From<Continuation> for ContinuationPolicy {
    fn from(c: Continuation) -> Self {
        match c {
            Continuation::Warn => ContinuationPolicy::Warn,
            Continuation::Reject => ContinuationPolicy::Reject,
        }
    }
}

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(long_version = rts::build::CLAP_LONG_VERSION)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, env = "LOGS_RTS", default_value = "logs/rts.org")]
    pub output: PathBuf,

    /// Text maps, `#` walls, `.` floor, `S` start and `G` goal
    #[arg()]
    pub maps: Vec<PathBuf>,

    #[arg(short, long, env = "RTS_ALGORITHM", value_enum, default_value_t = Algorithm::LssLrtaStar)]
    pub algorithm: Algorithm,

    #[arg(short, long, env = "RTS_TERMINATION", value_enum, default_value_t = Termination::Expansions)]
    pub termination: Termination,
    #[arg(short, long, env = "RTS_BUDGET", default_value_t = 100u64)]
    pub budget: u64,

    /// Initial ARA* heuristic inflation
    #[arg(long, default_value_t = 3.0f64)]
    pub inflation: f64,

    /// What LSS-LRTA* does when resumed from an unexpected state
    #[arg(long, value_enum, default_value_t = Continuation::Warn)]
    pub continuation: Continuation,

    #[arg(long, default_value_t = 100_000usize)]
    pub max_planning_calls: usize,

    #[arg(long, default_value_t = 1usize << 16)]
    pub node_capacity: usize,

    #[arg(long, default_value_t = 10u64)]
    pub num_instances: u64,
    /// Seed of the first random instance, the rest follow
    #[arg(long, default_value_t = 0u64)]
    pub seed: u64,
    #[arg(long, default_value_t = 1u16)]
    pub instance_goals: u16,

    #[arg(long, env = "RTS_LOG", default_value_t = LevelFilter::WARN)]
    pub log_level: LevelFilter,

    #[command(flatten)]
    color: colorchoice_clap::Color,
}

impl Args {
    fn checker(&self) -> Box<dyn TerminationChecker> {
        match self.termination {
            Termination::Time => Box::new(TimeTerminationChecker::new(Duration::from_millis(
                self.budget,
            ))),
            Termination::Expansions => Box::new(ExpansionTerminationChecker::new(self.budget)),
        }
    }

    fn episode_config(&self) -> EpisodeConfig {
        EpisodeConfig {
            max_planning_calls: self.max_planning_calls,
        }
    }
}

fn drive<P, W>(
    out: &mut BufWriter<W>,
    args: &Args,
    world: &GridWorld,
    start: GridState,
    planner: P,
) -> std::io::Result<ExperimentResult<GridState, GridAction, GridCost>>
where
    P: RealTimePlanner<GridState, GridAction, GridCost>,
    W: std::io::Write,
{
    let mut agent = RtsAgent::new(planner);
    let mut checker = args.checker();
    let result = run_episode(
        world,
        &mut agent,
        start,
        checker.as_mut(),
        &args.episode_config(),
    );

    writeln!(out, "****** Result")?;
    result.write_report(&mut *out)?;
    writeln!(out, "****** Planner")?;
    agent.planner().stats().write_stats(&mut *out)?;
    Ok(result)
}

fn solve<W: std::io::Write>(
    out: &mut BufWriter<W>,
    args: &Args,
    name: &str,
    world: &GridWorld,
) -> std::io::Result<()> {
    let Some(start) = world.start() else {
        writeln!(out, "FIXME {name} has no start")?;
        return Ok(());
    };
    writeln!(out, "#+begin_quote\n{world}\n#+end_quote")?;

    let result = match args.algorithm {
        Algorithm::LssLrtaStar => {
            let config = LssLrtaStarConfig {
                node_capacity: args.node_capacity,
                continuation: args.continuation.into(),
                ..Default::default()
            };
            let planner = LssLrtaStar::with_config(world.clone(), config);
            drive(out, args, world, start, planner)?
        }
        Algorithm::AraStar => {
            let planner =
                AnytimeRepairingAStar::with_config(world.clone(), args.inflation, args.node_capacity);
            drive(out, args, world, start, planner)?
        }
    };

    if result.is_success() {
        println!(
            "{} {name}: cost {} in {} calls",
            "OK".green(),
            result.path_cost(),
            result.planning_calls
        );
    } else if let Some(e) = &result.error {
        println!("{} {name}: {e}", "FAIL".red());
    }

    Ok(())
}

fn write_header<W: std::io::Write>(out: &mut BufWriter<W>, args: &Args) -> std::io::Result<()> {
    writeln!(out, ":PROPERTIES:")?;
    writeln!(out, ":VERSION: {:?}", rts::build::PKG_VERSION)?;
    writeln!(out, ":GIT_BRANCH: {:?}", shadow_rs::branch())?;
    writeln!(out, ":BUILD_IS_DEBUG: {}", shadow_rs::is_debug())?;
    writeln!(out, ":ALGORITHM: {:?}", args.algorithm)?;
    writeln!(out, ":TERMINATION: {:?} {}", args.termination, args.budget)?;
    writeln!(out, ":END:")?;
    writeln!(out, "#+title: Real-time search runs")?;
    writeln!(out)?;
    Ok(())
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    args.color.write_global();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    println!("Logging to {:?}", args.output.yellow());
    if let Some(dir) = args.output.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(&args.output)?;
    let mut out = BufWriter::new(file);
    write_header(&mut out, &args)?;

    writeln!(out, "* Runs")?;
    if args.maps.is_empty() {
        let world = GridWorld::try_from(indoc! {"
            S.........
            .########.
            .#......#.
            .#.####.#.
            .#.#G.#.#.
            .#.#..#.#.
            .#.##.#.#.
            .#....#.#.
            .######.#.
            ..........
        "})
        .map_err(std::io::Error::other)?;
        writeln!(out, "** Built-in map")?;
        solve(&mut out, &args, "built-in", &world)?;
    }

    for p in &args.maps {
        let base = GridWorld::try_from(p.as_path()).map_err(std::io::Error::other)?;
        writeln!(out, "** Map {:?} ({:?})", p, base.dimensions())?;
        let name = p.display().to_string();

        if base.start().is_some() && !base.goals().is_empty() {
            writeln!(out, "*** As given")?;
            solve(&mut out, &args, &name, &base)?;
        }

        writeln!(out, "*** Random instances")?;
        for instance in args.seed..args.seed + args.num_instances {
            writeln!(out, "**** Instance {instance}")?;
            let mut rng = ChaCha8Rng::seed_from_u64(instance);
            match base.randomize(&mut rng, 1, args.instance_goals) {
                Some(world) => solve(&mut out, &args, &format!("{name}#{instance}"), &world)?,
                None => writeln!(
                    out,
                    "FIXME Failed to generate random problem with seed {} with {} goals",
                    instance, args.instance_goals,
                )?,
            }
        }
    }

    out.flush()?;
    Ok(())
}
