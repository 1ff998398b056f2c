// Keyboard teleop: WASD move in x/y, E/C up/down, I/K pitch, O/L grip, R/F step, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;
use xarm_zenoh_runtime::arm::CartesianPose;
use xarm_zenoh_runtime::config::TOPIC_CMD_ARM;
use xarm_zenoh_runtime::messages::ArmCommand;

const STEPS_CM: [f64; 3] = [0.2, 0.5, 1.0]; // per key press
const PITCH_STEP: f64 = 5.0; // deg per key press
const GRIP_STEP: u16 = 50;
const GRIP_MAX: u16 = 1000;
const MOVE_MS: u16 = 200;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_ARM).await?;

    info!("Controls: WASD=x/y, E/C=z, I/K=pitch, O/L=grip, R/F=step, Q=quit");
    info!("Step: {} cm", STEPS_CM[0]);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;
    let mut pose = CartesianPose::new(21.0, 0.0, 10.0, 0.0);
    let mut grip: u16 = 500;

    loop {
        // Only changed poses are published, the runtime holds the last one
        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let step = STEPS_CM[step_idx];
        match code {
            KeyCode::Char('w') => pose.x += step,
            KeyCode::Char('s') => pose.x -= step,
            KeyCode::Char('a') => pose.y += step,
            KeyCode::Char('d') => pose.y -= step,
            KeyCode::Char('e') => pose.z += step,
            KeyCode::Char('c') => pose.z -= step,
            KeyCode::Char('i') => pose.pitch += PITCH_STEP,
            KeyCode::Char('k') => pose.pitch -= PITCH_STEP,
            KeyCode::Char('o') => grip = grip.saturating_sub(GRIP_STEP),
            KeyCode::Char('l') => grip = (grip + GRIP_STEP).min(GRIP_MAX),

            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEPS_CM.len() - 1);
                info!("Step: {} cm", STEPS_CM[step_idx]);
                continue;
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                info!("Step: {} cm", STEPS_CM[step_idx]);
                continue;
            }

            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        }

        let cmd = ArmCommand::Pose {
            x: pose.x,
            y: pose.y,
            z: pose.z,
            pitch: pose.pitch,
            wrist_roll: 90.0,
            grip,
            duration_ms: MOVE_MS,
            steps: None,
        };
        info!(
            "Pose ({:.1}, {:.1}, {:.1}) pitch {:.0} grip {}",
            pose.x, pose.y, pose.z, pose.pitch, grip
        );
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}
