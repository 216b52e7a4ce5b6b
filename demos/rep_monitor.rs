use tracing::{error, info};
use liftbridge::{EchoLevel, Result, SessionEvent, TrainerDevice, WorkoutParameters, WorkoutState};

/// Free-lift monitor: no fixed target, stall detection ends the set.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("🏋️ Liftbridge Rep Monitor (just lift)");

    let device = match TrainerDevice::connect_first().await {
        Ok(device) => device,
        Err(e) => {
            error!("❌ Failed to connect to trainer: {}", e);
            return Err(e);
        }
    };
    info!("✅ Connected to: {} ({})", device.info().name, device.info().model);

    let params = WorkoutParameters::just_lift(EchoLevel::Standard, 100);
    let mut workout = device.start_workout(params).await?;

    while let Some(event) = workout.next_event().await {
        match event {
            SessionEvent::StateChanged(state) => {
                info!("📊 {state}");
                match state {
                    WorkoutState::SetSummary { summary } => {
                        info!(
                            "🏁 {} reps | peak {:.1} kg | avg {:.0} W over {:?}",
                            summary.working_reps,
                            summary.peak_load_kg,
                            summary.avg_power_w,
                            summary.duration
                        );
                    }
                    WorkoutState::Completed | WorkoutState::Error { .. } => break,
                    _ => {}
                }
            }
            SessionEvent::Reps(count) => {
                if count.pending_rep {
                    info!(
                        "💪 Rep {} lowering... {:.0}%",
                        count.working_reps + 1,
                        count.pending_rep_progress * 100.0
                    );
                } else {
                    info!("💪 Rep {} complete", count.working_reps);
                }
            }
            SessionEvent::Telemetry(_) => {}
        }
    }

    device.disconnect().await?;
    Ok(())
}
