//! Test harness for bootstrap end-to-end tests.
//!
//! Builds a [`BootstrapService`] from an in-memory configuration and records
//! every audit event, so tests can drive a session the way a transport would
//! and then inspect the trail.

use std::sync::Arc;

use lwm2m_bootstrap_auth::SecurityInfo;
use lwm2m_bootstrap_core::{
    AuditAction, AuditEvent, DeviceIdentity, EndpointName, ObjectPath, OrchestratorConfig,
};
use lwm2m_bootstrap_server::bootstrap_config::{SecurityInstance, SecurityMode, ServerInstance};
use lwm2m_bootstrap_server::{
    run_simulation, BootstrapConfig, BootstrapService, MemoryAuditSink, ServerConfig,
    SimulatedDevice, SimulationReport, Stores,
};

pub const PSK_ENDPOINT: &str = "sensor-1";
pub const PSK_IDENTITY: &str = "sensor-1-key";
pub const X509_ENDPOINT: &str = "cam-2";
pub const RPK_ENDPOINT: &str = "gw-3";
pub const RPK_KEY: &[u8] = &[0x04, 0x11, 0x22, 0x33];

/// A bootstrap service wired to in-memory stores with a recording audit sink.
pub struct TestServer {
    pub service: BootstrapService,
    pub stores: Stores,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestServer {
    /// Three provisioned devices, one per credential kind.
    pub fn new() -> Self {
        Self::with_config(default_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let audit = Arc::new(MemoryAuditSink::new());
        let (service, stores) = BootstrapService::from_config(&config, audit.clone())
            .expect("test configuration should be valid");
        Self {
            service,
            stores,
            audit,
        }
    }

    pub async fn simulate(
        &self,
        endpoint: &str,
        identity: DeviceIdentity,
        device: &mut SimulatedDevice,
    ) -> SimulationReport {
        run_simulation(&self.service, EndpointName::new(endpoint), identity, device)
            .await
            .expect("simulation should not hit a service error")
    }

    pub fn trail(&self, endpoint: &str) -> Vec<AuditEvent> {
        self.audit.for_endpoint(&EndpointName::new(endpoint))
    }

    pub fn actions(&self, endpoint: &str) -> Vec<AuditAction> {
        self.trail(endpoint).iter().map(|e| e.action).collect()
    }

    /// Rendered `<level>: <message>` lines.
    pub fn lines(&self, endpoint: &str) -> Vec<String> {
        self.trail(endpoint).iter().map(ToString::to_string).collect()
    }
}

pub fn default_config() -> ServerConfig {
    ServerConfig {
        orchestrator: OrchestratorConfig::default(),
        security: vec![
            SecurityInfo::psk(PSK_ENDPOINT, PSK_IDENTITY, vec![0xaa; 16]),
            SecurityInfo::x509(X509_ENDPOINT),
            SecurityInfo::rpk(RPK_ENDPOINT, RPK_KEY.to_vec()),
        ],
        bootstrap: vec![
            template(PSK_ENDPOINT),
            template(X509_ENDPOINT),
            template(RPK_ENDPOINT),
        ],
    }
}

/// Wipe security and server objects, then write one bootstrap account, one
/// device-management account and its server instance.
pub fn template(endpoint: &str) -> BootstrapConfig {
    BootstrapConfig {
        to_delete: vec![ObjectPath::object(0), ObjectPath::object(1)],
        security: vec![
            SecurityInstance {
                instance_id: 0,
                uri: "coaps://bs.example.com:5684".into(),
                bootstrap_server: true,
                security_mode: SecurityMode::Psk,
                public_key_or_identity: PSK_IDENTITY.as_bytes().to_vec(),
                server_public_key: Vec::new(),
                secret_key: vec![0xaa; 16],
                short_server_id: None,
                client_hold_off_time: Some(1),
                bootstrap_account_timeout: Some(0),
            },
            SecurityInstance {
                instance_id: 1,
                uri: "coaps://dm.example.com:5684".into(),
                bootstrap_server: false,
                security_mode: SecurityMode::Psk,
                public_key_or_identity: PSK_IDENTITY.as_bytes().to_vec(),
                server_public_key: Vec::new(),
                secret_key: vec![0xbb; 16],
                short_server_id: Some(123),
                client_hold_off_time: None,
                bootstrap_account_timeout: None,
            },
        ],
        servers: vec![ServerInstance {
            instance_id: 0,
            short_server_id: 123,
            lifetime: 300,
            default_min_period: Some(1),
            default_max_period: None,
            notification_storing: false,
            binding: "U".into(),
        }],
        ..BootstrapConfig::new(endpoint)
    }
}
