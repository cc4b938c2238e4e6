//! lwm2m-bootstrap - inspect and dry-run bootstrap configurations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use lwm2m_bootstrap_auth::{CredentialStore, SecurityAuthorizer};
use lwm2m_bootstrap_core::{DeviceIdentity, EndpointName};
use lwm2m_bootstrap_server::{
    run_simulation, BootstrapService, Fault, FanoutAuditSink, MemoryAuditSink, ServerConfig,
    SimulatedDevice, SimulationOutcome, TracingAuditSink,
};
use lwm2m_bootstrap_server::config::CONFIG_ENV;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// LwM2M bootstrap server tooling
#[derive(Parser)]
#[command(name = "lwm2m-bootstrap", version, about)]
struct Cli {
    /// Server configuration file
    #[arg(long, short, env = CONFIG_ENV)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and check whether a device may bootstrap
    Check {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Run a full bootstrap exchange against a simulated device
    Simulate {
        #[command(flatten)]
        device: DeviceArgs,

        /// Security instance holding the device's factory bootstrap account
        #[arg(long, default_value_t = 0)]
        bootstrap_instance: u16,

        /// Inject a fault at the N-th operation (1-based)
        #[arg(long, requires = "fault")]
        fail_at: Option<usize>,

        /// Kind of fault to inject
        #[arg(long, value_enum, requires = "fail_at")]
        fault: Option<FaultArg>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Endpoint name the device claims
    #[arg(long, short)]
    endpoint: String,

    /// PSK identity used in the handshake
    #[arg(long, conflicts_with_all = ["x509_subject", "rpk"])]
    psk_identity: Option<String>,

    /// X.509 certificate subject, e.g. "CN=sensor-1,O=Acme"
    #[arg(long, conflicts_with = "rpk")]
    x509_subject: Option<String>,

    /// Raw public key, base64
    #[arg(long)]
    rpk: Option<String>,
}

impl DeviceArgs {
    fn identity(&self) -> Result<DeviceIdentity> {
        if let Some(identity) = &self.psk_identity {
            return Ok(DeviceIdentity::psk(identity.clone()));
        }
        if let Some(subject) = &self.x509_subject {
            return Ok(DeviceIdentity::x509(subject.clone()));
        }
        if let Some(key) = &self.rpk {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .context("--rpk is not valid base64")?;
            return Ok(DeviceIdentity::rpk(bytes));
        }
        bail!("one of --psk-identity, --x509-subject or --rpk is required")
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FaultArg {
    /// Device answers 4.00 Bad Request
    Error,
    /// Device never answers
    Transport,
}

impl From<FaultArg> for Fault {
    fn from(arg: FaultArg) -> Self {
        match arg {
            FaultArg::Error => Fault::ErrorResponse,
            FaultArg::Transport => Fault::TransportFailure,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Check { device } => cmd_check(&config, &device).await,
        Commands::Simulate {
            device,
            bootstrap_instance,
            fail_at,
            fault,
            json,
        } => {
            let mut simulated = SimulatedDevice::new(bootstrap_instance);
            if let (Some(nth), Some(fault)) = (fail_at, fault) {
                simulated = simulated.with_fault(nth, fault.into());
            }
            cmd_simulate(&config, &device, simulated, json).await
        }
    }
}

async fn cmd_check(config: &ServerConfig, device: &DeviceArgs) -> Result<()> {
    let endpoint = EndpointName::new(device.endpoint.clone());
    let identity = device.identity()?;

    let (_, stores) = BootstrapService::from_config(config, Arc::new(TracingAuditSink))
        .context("Invalid configuration")?;
    let authorizer = SecurityAuthorizer::new(stores.credentials.clone());
    let modes: Vec<&str> = authorizer
        .store()
        .get_all_by_endpoint(&endpoint)
        .context("Failed to read credentials")?
        .iter()
        .map(|info| info.credential.mode())
        .collect();

    let authorized = tokio::task::spawn_blocking({
        let endpoint = endpoint.clone();
        let identity = identity.clone();
        move || authorizer.is_authorized(&endpoint, &identity)
    })
    .await
    .context("Authorization check panicked")?;
    let has_template = stores.configs.contains(&endpoint);

    println!("Endpoint:   {}", endpoint);
    println!("Identity:   {}", identity.kind());
    println!(
        "Records:    {}",
        if modes.is_empty() { "none".to_string() } else { modes.join(", ") }
    );
    println!("Authorized: {}", if authorized { "yes" } else { "no" });
    println!("Template:   {}", if has_template { "yes" } else { "no" });

    if !authorized {
        bail!("{endpoint} would be refused");
    }
    Ok(())
}

async fn cmd_simulate(
    config: &ServerConfig,
    device: &DeviceArgs,
    mut simulated: SimulatedDevice,
    json: bool,
) -> Result<()> {
    let endpoint = EndpointName::new(device.endpoint.clone());
    let identity = device.identity()?;

    let trail = Arc::new(MemoryAuditSink::new());
    let audit = FanoutAuditSink::new()
        .with(trail.clone())
        .with(Arc::new(TracingAuditSink));
    let (service, _stores) =
        BootstrapService::from_config(config, Arc::new(audit)).context("Invalid configuration")?;

    let report = run_simulation(&service, endpoint, identity, &mut simulated)
        .await
        .context("Simulation failed")?;

    if json {
        let output = serde_json::json!({
            "report": report,
            "audit": trail.events(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to encode report")?
        );
    } else {
        println!("Exchanges");
        println!("=========");
        for (i, (op, outcome)) in report.exchanges.iter().enumerate() {
            let result = match outcome.response() {
                Some(response) => response.to_string(),
                None => "transport failure".to_string(),
            };
            println!("{:>3}. {:<24} {}", i + 1, op.to_string(), result);
        }
        println!();
        println!("Audit trail");
        println!("===========");
        for event in trail.events() {
            println!("{}  {}", event.ts.format("%H:%M:%S%.3f"), event);
        }
        println!();
        match report.outcome {
            SimulationOutcome::Finished => println!("Result: finished"),
            SimulationOutcome::Failed(cause) => println!("Result: failed ({cause})"),
        }
    }

    if let SimulationOutcome::Failed(cause) = report.outcome {
        bail!("bootstrap failed: {cause}");
    }
    Ok(())
}
