use tracing::{error, info};
use liftbridge::{
    echo, EchoLevel, Result, SessionEvent, TrainerDevice, WorkoutParameters, WorkoutState,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("🏋️ Liftbridge Echo Mode Example");

    // Show what the machine will be asked to do, before any connection.
    // The echo parameter derivation is a pure function.
    let eccentric = 120;
    for level in [EchoLevel::Lite, EchoLevel::Standard, EchoLevel::Hard, EchoLevel::Max] {
        let params = echo::derive_params(level, eccentric)?;
        info!(
            "  {level}: concentric {}% | gain x{:.2} | cap {:.0} kg",
            params.concentric_pct,
            f32::from(params.gain_x100) / 100.0,
            params.cap_kg,
        );
    }

    let device = match TrainerDevice::connect_first().await {
        Ok(device) => {
            info!("✅ Connected to: {}", device.info().name);
            device
        }
        Err(e) => {
            error!("❌ Failed to connect to trainer: {}", e);
            return Err(e);
        }
    };

    // Hard tier at 120% eccentric load, 2 warmup reps, 8 working reps
    let params = WorkoutParameters::echo(EchoLevel::Hard, eccentric, 2, 8);
    let mut workout = device.start_workout(params).await?;

    while let Some(event) = workout.next_event().await {
        match event {
            SessionEvent::StateChanged(state) => {
                info!("📊 State: {state}");
                if matches!(state, WorkoutState::Completed | WorkoutState::Error { .. }) {
                    break;
                }
            }
            SessionEvent::Reps(count) => info!("💪 Working reps: {}", count.working_reps),
            SessionEvent::Telemetry(sample) => {
                info!(
                    "📈 L {:.1} kg / R {:.1} kg | {:.0} W",
                    sample.left.load_kg, sample.right.load_kg, sample.power_w
                );
            }
        }
    }

    device.disconnect().await?;
    Ok(())
}
