//! Scripted device for exercising a full bootstrap exchange without a
//! network transport.

use std::collections::{BTreeMap, BTreeSet};

use lwm2m_bootstrap_core::{
    BootstrapPolicy, DeviceIdentity, DeviceResponse, EndpointName, FailureCause, ObjectLink,
    ObjectPath, Outcome, ProvisioningOperation, ResourceValue, ResponseCode, SECURITY_OBJECT_ID,
};
use serde::Serialize;

use crate::service::{BootstrapService, ServiceError};

/// Upper bound on operations per simulated exchange.
pub const MAX_EXCHANGES: usize = 1024;

/// Misbehaviour injected at a given operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// Answer with `4.00 Bad Request`.
    ErrorResponse,
    /// Never answer.
    TransportFailure,
}

/// An in-memory LwM2M client answering bootstrap operations.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    /// object id -> instance id -> short server id (if written)
    instances: BTreeMap<u16, BTreeMap<u16, Option<i64>>>,
    /// Security instance holding the factory bootstrap-server account.
    bootstrap_instance: u16,
    faults: BTreeMap<usize, Fault>,
    handled: usize,
}

impl SimulatedDevice {
    /// A device that only knows its factory bootstrap-server account.
    pub fn new(bootstrap_instance: u16) -> Self {
        let mut instances = BTreeMap::new();
        instances.insert(
            SECURITY_OBJECT_ID,
            BTreeMap::from([(bootstrap_instance, None)]),
        );
        Self {
            instances,
            bootstrap_instance,
            faults: BTreeMap::new(),
            handled: 0,
        }
    }

    /// Misbehave on the `nth` operation handled (1-based).
    #[must_use]
    pub fn with_fault(mut self, nth: usize, fault: Fault) -> Self {
        self.faults.insert(nth, fault);
        self
    }

    pub fn instances(&self, object_id: u16) -> BTreeSet<u16> {
        self.instances
            .get(&object_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Answer one operation.
    pub fn respond(&mut self, op: &ProvisioningOperation) -> Outcome {
        self.handled += 1;
        match self.faults.get(&self.handled) {
            Some(Fault::TransportFailure) => {
                return Outcome::TransportFailure("request timed out".into())
            }
            Some(Fault::ErrorResponse) => {
                return Outcome::ErrorResponse(
                    DeviceResponse::new(ResponseCode::BadRequest)
                        .with_error_message("injected fault"),
                )
            }
            None => {}
        }

        let response = match op {
            ProvisioningOperation::Discover { path } => self.discover(path),
            ProvisioningOperation::Read { path } => {
                if self.exists(path) {
                    DeviceResponse::new(ResponseCode::Content)
                } else {
                    DeviceResponse::new(ResponseCode::NotFound)
                }
            }
            ProvisioningOperation::Write { path, resources } => self.write(path, resources),
            ProvisioningOperation::Delete { path } => self.delete(path),
            ProvisioningOperation::Finish => DeviceResponse::new(ResponseCode::Changed),
        };
        Outcome::from_response(response)
    }

    fn exists(&self, path: &ObjectPath) -> bool {
        match (path.object_id(), path.instance_id()) {
            (None, _) => true,
            (Some(o), None) => self.instances.contains_key(&o),
            (Some(o), Some(i)) => self.instances.get(&o).is_some_and(|m| m.contains_key(&i)),
        }
    }

    fn discover(&self, path: &ObjectPath) -> DeviceResponse {
        let mut links = Vec::new();
        for (&object, instances) in &self.instances {
            if path.object_id().is_some_and(|o| o != object) {
                continue;
            }
            links.push(ObjectLink::new(ObjectPath::object(object)));
            for (&instance, ssid) in instances {
                let link = ObjectLink::new(ObjectPath::instance(object, instance));
                links.push(match ssid {
                    Some(ssid) => link.with_attribute("ssid", ssid.to_string()),
                    None => link,
                });
            }
        }
        DeviceResponse::new(ResponseCode::Content).with_links(links)
    }

    fn write(
        &mut self,
        path: &ObjectPath,
        resources: &BTreeMap<u16, ResourceValue>,
    ) -> DeviceResponse {
        let (Some(object), Some(instance)) = (path.object_id(), path.instance_id()) else {
            return DeviceResponse::new(ResponseCode::BadRequest)
                .with_error_message("writes target an instance");
        };
        // Security ssid is resource 10, server ssid is resource 0.
        let ssid_res = if object == SECURITY_OBJECT_ID { 10 } else { 0 };
        let ssid = match resources.get(&ssid_res) {
            Some(ResourceValue::Integer(v)) => Some(*v),
            _ => None,
        };
        self.instances
            .entry(object)
            .or_default()
            .insert(instance, ssid);
        DeviceResponse::new(ResponseCode::Changed)
    }

    fn delete(&mut self, path: &ObjectPath) -> DeviceResponse {
        let bs = self.bootstrap_instance;
        let keep_bootstrap = |object: u16, instance: u16| object == SECURITY_OBJECT_ID && instance == bs;

        match (path.object_id(), path.instance_id()) {
            (None, _) => {
                for (&object, instances) in self.instances.iter_mut() {
                    instances.retain(|&i, _| keep_bootstrap(object, i));
                }
            }
            (Some(object), None) => {
                if let Some(instances) = self.instances.get_mut(&object) {
                    instances.retain(|&i, _| keep_bootstrap(object, i));
                }
            }
            (Some(object), Some(instance)) => {
                if keep_bootstrap(object, instance) {
                    return DeviceResponse::new(ResponseCode::BadRequest)
                        .with_error_message("cannot delete the bootstrap-server account");
                }
                if let Some(instances) = self.instances.get_mut(&object) {
                    instances.remove(&instance);
                }
            }
        }
        DeviceResponse::new(ResponseCode::Deleted)
    }
}

/// How a simulated exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "cause", rename_all = "snake_case")]
pub enum SimulationOutcome {
    Finished,
    Failed(FailureCause),
}

/// Everything that happened during one simulated exchange.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub endpoint: EndpointName,
    pub outcome: SimulationOutcome,
    pub exchanges: Vec<(ProvisioningOperation, Outcome)>,
}

/// Drive one bootstrap exchange between `service` and `device` the way a
/// transport layer would.
pub async fn run_simulation(
    service: &BootstrapService,
    endpoint: EndpointName,
    identity: DeviceIdentity,
    device: &mut SimulatedDevice,
) -> Result<SimulationReport, ServiceError> {
    let start = service.begin(endpoint.clone(), identity).await?;
    let mut report = SimulationReport {
        endpoint,
        outcome: SimulationOutcome::Finished,
        exchanges: Vec::new(),
    };

    let fail = |cause: FailureCause| async move {
        service.fail(start.id, cause).await?;
        Ok::<_, ServiceError>(SimulationOutcome::Failed(cause))
    };

    if !start.authorized {
        report.outcome = fail(FailureCause::Unauthorized).await?;
        return Ok(report);
    }

    match service.has_work(start.id).await {
        Ok(true) => {}
        Ok(false) => {
            report.outcome = fail(FailureCause::NoBootstrapConfig).await?;
            return Ok(report);
        }
        Err(e) => {
            tracing::error!(error = %e, "Bootstrap could not start");
            report.outcome = fail(FailureCause::InternalError).await?;
            return Ok(report);
        }
    }

    let mut op = service.first_operation(start.id).await?;
    for _ in 0..MAX_EXCHANGES {
        let outcome = device.respond(&op);
        report.exchanges.push((op.clone(), outcome.clone()));

        let was_finish = op.is_finish();
        let policy = match service.report(start.id, op, outcome).await {
            Ok(policy) => policy,
            Err(ServiceError::Orchestrator(e)) => {
                tracing::error!(error = %e, "Bootstrap aborted");
                report.outcome = fail(FailureCause::InternalError).await?;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        match policy {
            BootstrapPolicy::Continue(next) => op = next,
            BootstrapPolicy::Finished => {
                service.end(start.id).await?;
                report.outcome = SimulationOutcome::Finished;
                return Ok(report);
            }
            BootstrapPolicy::Failed => {
                let cause = if was_finish {
                    FailureCause::FinishFailed
                } else {
                    FailureCause::RequestFailed
                };
                report.outcome = fail(cause).await?;
                return Ok(report);
            }
        }
    }

    tracing::error!(limit = MAX_EXCHANGES, "Bootstrap exchange did not terminate");
    report.outcome = fail(FailureCause::InternalError).await?;
    Ok(report)
}
