//! Provisioning work derived from the template store.
//!
//! Without `auto_id_for_security_object` a session gets a single final batch:
//! deletes, then security writes, then server writes. With it, the device is
//! first asked to discover `/0`; the final batch then reuses the instance id
//! of the device's own bootstrap-server account and packs every other
//! security instance into the lowest free ids.

use std::sync::Arc;

use lwm2m_bootstrap_core::{
    BootstrapSession, ExchangeRecord, ObjectPath, Outcome, ProvisioningOperation, TaskBatch,
    TaskBatchSource, SECURITY_OBJECT_ID, SERVER_OBJECT_ID,
};

use crate::bootstrap_config::{BootstrapConfig, BootstrapConfigStore};

/// Link attribute a device sets on every security instance except its
/// bootstrap-server account.
const SSID_ATTRIBUTE: &str = "ssid";

fn discover_security() -> ProvisioningOperation {
    ProvisioningOperation::Discover {
        path: ObjectPath::object(SECURITY_OBJECT_ID),
    }
}

/// [`TaskBatchSource`] backed by a [`BootstrapConfigStore`].
#[derive(Debug, Clone)]
pub struct ConfigStoreTaskProvider {
    configs: Arc<BootstrapConfigStore>,
}

impl ConfigStoreTaskProvider {
    pub fn new(configs: Arc<BootstrapConfigStore>) -> Self {
        Self { configs }
    }

    fn final_batch(config: &BootstrapConfig, device_bs_instance: Option<u16>) -> TaskBatch {
        let ids = security_instance_ids(config, device_bs_instance);

        let deletes = config
            .to_delete
            .iter()
            .map(|path| ProvisioningOperation::Delete { path: *path });

        let security = config
            .security
            .iter()
            .zip(ids)
            .map(|(instance, id)| ProvisioningOperation::Write {
                path: ObjectPath::instance(SECURITY_OBJECT_ID, id),
                resources: instance.resources(),
            });

        let servers = config
            .servers
            .iter()
            .map(|instance| ProvisioningOperation::Write {
                path: ObjectPath::instance(SERVER_OBJECT_ID, instance.instance_id),
                resources: instance.resources(),
            });

        TaskBatch::new(deletes.chain(security).chain(servers).collect(), true)
            .with_object_model(config.object_model())
    }
}

impl TaskBatchSource for ConfigStoreTaskProvider {
    fn next_batch(
        &self,
        session: &BootstrapSession,
        prior: Option<&[ExchangeRecord]>,
    ) -> Option<TaskBatch> {
        let config = self.configs.get(session.endpoint())?;

        match prior {
            None if config.auto_id_for_security_object => {
                tracing::debug!(endpoint = %session.endpoint(), "Discovering security instances");
                Some(
                    TaskBatch::new(vec![discover_security()], false)
                        .with_object_model(config.object_model()),
                )
            }
            None => Some(Self::final_batch(&config, None)),
            Some(records) => {
                let discover = records
                    .iter()
                    .find(|r| r.operation == discover_security())?;
                let bs_instance = device_bootstrap_instance(&discover.outcome);
                tracing::debug!(
                    endpoint = %session.endpoint(),
                    bootstrap_instance = ?bs_instance,
                    "Renumbering security instances"
                );
                Some(Self::final_batch(&config, bs_instance))
            }
        }
    }
}

/// The device's bootstrap-server account: the security instance advertised
/// without an `ssid` attribute. `None` when discovery failed or found none.
fn device_bootstrap_instance(outcome: &Outcome) -> Option<u16> {
    let Outcome::Success(response) = outcome else {
        return None;
    };
    response
        .links
        .iter()
        .filter(|link| link.path.object_id() == Some(SECURITY_OBJECT_ID))
        .filter(|link| link.path.resource_id().is_none())
        .find_map(|link| match link.path.instance_id() {
            Some(id) if link.attribute(SSID_ATTRIBUTE).is_none() => Some(id),
            _ => None,
        })
}

/// Instance ids for the configured security instances, in configured order.
fn security_instance_ids(config: &BootstrapConfig, device_bs_instance: Option<u16>) -> Vec<u16> {
    let Some(bs_id) = device_bs_instance else {
        return config.security.iter().map(|s| s.instance_id).collect();
    };

    let mut next_free = (0..=u16::MAX).filter(move |id| *id != bs_id);
    config
        .security
        .iter()
        .map(|s| {
            let id = if s.bootstrap_server {
                Some(bs_id)
            } else {
                next_free.next()
            };
            id.unwrap_or(s.instance_id)
        })
        .collect()
}
