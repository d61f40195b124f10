use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ofb_fc::autodetect::{resolve_url, run_autodetect};
use ofb_fc::control::ControlLoop;
use ofb_fc::doctor as fc_doctor;
use ofb_fc::mav::MavPlane;
use ofb_fc::state::TelemetryMirror;
use ofb_fc::{ControlConfig, LinkConfig};
use ofb_nav::doctor as nav_doctor;
use ofb_nav::trajectory::{FigureEight, TrajectoryCfg};

#[derive(Debug, Parser)]
#[command(name = "ofb", version, about = "ofb - figure-eight offboard flight for PX4")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration.
    Doctor,
    /// Connect, hand over to offboard and fly until Ctrl-C.
    Run,
    /// Print the setpoints the trajectory would produce, one CSV row per tick.
    Preview {
        #[arg(long, default_value_t = 104)]
        ticks: u32,
    },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
    /// Wait for the first autopilot heartbeat and print the reported status.
    Status,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    control: ControlConfig,
    trajectory: TrajectoryCfg,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Preview { ticks } => preview(&cfg, ticks)?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    nav_doctor::check_trajectory(&cfg.trajectory)?;
    fc_doctor::check_control(&cfg.control)?;
    fc_doctor::check_link(&cfg.link)?;
    if cfg.link.autodetect {
        info!("doctor: link autodetect enabled (OK)");
    }
    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    doctor(cfg)?;

    let trajectory = FigureEight::new(cfg.trajectory.clone())?;
    let mirror = TelemetryMirror::new();
    let url = resolve_url(&cfg.link)?;
    let mut plane = MavPlane::connect(&url, &cfg.link, mirror.clone()).context("FC open")?;
    plane.start(&cfg.link)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("run: ctrl-c handler failed: {:#}", e);
            std::future::pending::<()>().await;
        }
        info!("run: shutdown requested");
    };

    let summary = ControlLoop::new(plane, mirror, trajectory, cfg.control.clone())
        .run(shutdown)
        .await?;
    println!(
        "ticks={} setpoints={} mode_requests={} arm_requests={} wraps={}",
        summary.ticks, summary.setpoints, summary.mode_requests, summary.arm_requests, summary.wraps
    );
    Ok(())
}

fn preview(cfg: &Config, ticks: u32) -> Result<()> {
    let mut gen = FigureEight::new(cfg.trajectory.clone())?;
    println!("tick,segment,phase,x,y,z,yaw,qx,qy,qz,qw");
    for tick in 0..ticks {
        gen.advance();
        let sp = gen.evaluate();
        let (p, q) = (sp.position, sp.orientation.quaternion());
        println!(
            "{},{},{:.4},{:.3},{:.3},{:.3},{:.4},{:.5},{:.5},{:.5},{:.5}",
            tick, gen.segment(), gen.phase(), p.x, p.y, p.z, gen.phase(), q.i, q.j, q.k, q.w
        );
    }
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let res = run_autodetect(&cfg.link)?;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status => {
            let mirror = TelemetryMirror::new();
            let url = resolve_url(&cfg.link)?;
            let mut plane = MavPlane::connect(&url, &cfg.link, mirror.clone()).context("FC open")?;
            plane.start(&cfg.link)?;
            let st = tokio::time::timeout(cfg.link.connection_timeout(), mirror.wait_connected())
                .await
                .with_context(|| format!("no autopilot heartbeat on {} within {:?}", url, cfg.link.connection_timeout()))??;
            println!("url={}", url);
            println!("connected={}", st.connected);
            println!("armed={}", st.armed);
            println!("mode={}", st.mode);
            Ok(())
        }
    }
}
