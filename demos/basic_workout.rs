use tracing::{error, info};
use liftbridge::{ProgramMode, Result, SessionEvent, TrainerDevice, WorkoutParameters, WorkoutState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ Liftbridge Basic Workout Example");
    info!("Searching for Forma trainers...");

    // Connect to the first available trainer
    let device = match TrainerDevice::connect_first().await {
        Ok(device) => {
            info!("✅ Connected to: {} ({})", device.info().name, device.info().model);
            device
        }
        Err(e) => {
            error!("❌ Failed to connect to trainer: {}", e);
            return Err(e);
        }
    };

    // Old School mode: 25 kg per cable, 3 warmup reps, 10 working reps
    let params = WorkoutParameters::program(ProgramMode::OldSchool, 25.0, 3, 10);

    info!("⚡ Starting set: {:?}", params.workout);
    let mut workout = device.start_workout(params).await?;

    while let Some(event) = workout.next_event().await {
        match event {
            SessionEvent::StateChanged(state) => {
                info!("📊 State: {state}");
                if matches!(
                    state,
                    WorkoutState::Completed | WorkoutState::Error { .. }
                ) {
                    break;
                }
            }
            SessionEvent::Reps(count) => {
                info!(
                    "💪 Warmup {}/{} | Working {}",
                    count.warmup_reps,
                    3,
                    count.working_reps
                );
            }
            SessionEvent::Telemetry(_) => {}
        }
    }

    info!("🔌 Disconnecting...");
    device.disconnect().await?;
    info!("✅ Done");

    Ok(())
}
