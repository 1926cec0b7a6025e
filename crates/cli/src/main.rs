//! Datastory CLI - drive and inspect Hubble's law sessions.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use datastory_core::Marker;
use datastory_hubble::fill::{catalogue, fill_all_measurements};
use datastory_hubble::{stage_markers, HubbleStory, RecordingSkyViewer, SkyCommand, STAGES};
use datastory_progress::StageStateMachine;
use datastory_storage::{JsonStageStore, MemoryStageStore, StageStore};
use datastory_work::ControllerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datastory")]
#[command(about = "Hubble's law data story sessions", long_about = None)]
struct Cli {
    /// Directory holding stored stage states
    #[arg(long, global = true, default_value = ".datastory")]
    path: PathBuf,

    /// Student the session belongs to
    #[arg(long, global = true, default_value = "1")]
    student: u64,

    /// Quiet period before a state change is written
    #[arg(long, global = true, default_value = "500")]
    debounce_ms: u64,

    /// Keep state in memory instead of on disk
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stages and their markers
    Stages {
        /// Only this stage
        stage: Option<String>,
    },
    /// Walk every stage forward until a gate blocks
    Walk {
        /// Seed the student's measurements first
        #[arg(long)]
        seed: bool,
    },
    /// Print stored stage states
    Show {
        /// Only this stage
        stage: Option<String>,
    },
    /// Delete stored stage states
    Reset {
        /// Only this stage
        stage: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store: Arc<dyn StageStore> = if cli.in_memory {
        Arc::new(MemoryStageStore::new())
    } else {
        Arc::new(JsonStageStore::new(&cli.path).await?)
    };
    let config =
        ControllerConfig::default().with_write_debounce(Duration::from_millis(cli.debounce_ms));

    match cli.command {
        Commands::Stages { stage } => {
            for id in selected(stage.as_deref())? {
                let markers = stage_markers(id).unwrap_or_default();
                println!("{} ({} markers)", id, markers.len());
                for (ordinal, name) in markers.iter().enumerate() {
                    println!("  {:>2} {}", ordinal, name);
                }
            }
        }
        Commands::Walk { seed } => {
            let sky = Rc::new(RecordingSkyViewer::new());
            let story = HubbleStory::new(cli.student, store, config, sky.clone());
            if seed {
                fill_all_measurements(story.measurements(), cli.student);
            }
            walk(&story).await?;

            let commands = sky.take();
            let goto = commands.iter().filter(|c| matches!(c, SkyCommand::GoTo { .. })).count();
            println!("Sky viewer: {} commands, {} go-to", commands.len(), goto);
        }
        Commands::Show { stage } => {
            let sky = Rc::new(RecordingSkyViewer::new());
            let story = HubbleStory::new(cli.student, store, config, sky);
            for id in selected(stage.as_deref())? {
                let key = story.context().stage_key(id);
                match story.store().get_stage_state(&key).await? {
                    Some(doc) => println!("{}:\n{}", key, serde_json::to_string_pretty(&doc)?),
                    None => println!("{}: no stored state", key),
                }
            }
        }
        Commands::Reset { stage } => {
            let sky = Rc::new(RecordingSkyViewer::new());
            let story = HubbleStory::new(cli.student, store, config, sky);
            for id in selected(stage.as_deref())? {
                let key = story.context().stage_key(id);
                story.store().delete_stage_state(&key).await?;
                info!(%key, "Deleted stage state");
            }
        }
    }

    Ok(())
}

fn selected(stage: Option<&str>) -> Result<Vec<&'static str>> {
    match stage {
        None => Ok(STAGES.to_vec()),
        Some(id) => match STAGES.iter().find(|s| **s == id) {
            Some(s) => Ok(vec![*s]),
            None => bail!("Unknown stage `{}`; expected one of {}", id, STAGES.join(", ")),
        },
    }
}

async fn walk(story: &HubbleStory) -> Result<()> {
    let intro = story.mount_intro().await?;
    while intro.next() {}
    report(intro.machine());
    intro.unmount().await?;

    let spectra = story.mount_spectra().await?;
    for galaxy in catalogue() {
        spectra.add_galaxy(galaxy);
    }
    report(spectra.machine());
    spectra.unmount().await?;

    let introduction = story.mount_distance_introduction().await?;
    while introduction.next() {}
    report(introduction.machine());
    introduction.unmount().await?;

    let distance = story.mount_distance().await?;
    distance.fill_galaxy_distances();
    report(distance.machine());
    distance.unmount().await?;

    let prodata = story.mount_prodata(story.measurements().clone()).await?;
    match prodata.class_age() {
        Some(age) => println!("Class age: {:.2} Gyr", age),
        None => println!("Class age: not enough data"),
    }
    report(prodata.machine());
    prodata.unmount().await?;

    Ok(())
}

/// Advance until a gate blocks or the last marker is reached, then print the path.
fn report<M, F>(machine: &StageStateMachine<M, F>)
where
    M: Marker,
    F: Clone + PartialEq + 'static,
{
    let mut path = vec![machine.current_marker().name()];
    while let Ok(next) = machine.advance() {
        path.push(next.name());
    }
    match machine.blocking_gate() {
        Some(gate) => println!(
            "{}: {} (blocked by `{}`)",
            machine.stage_id(),
            path.join(" -> "),
            gate
        ),
        None => println!("{}: {}", machine.stage_id(), path.join(" -> ")),
    }
}
