//! GATT profile walk for a single device: services first, then the
//! characteristics of each service in the order the radio returned them.

use crate::domain::report::DiscoveryReport;
use crate::infrastructure::bluetooth::radio::{RadioError, RadioStack};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattOperation {
    GetServices,
    GetCharacteristics(Uuid),
}

impl fmt::Display for GattOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetServices => write!(f, "service discovery"),
            Self::GetCharacteristics(service) => {
                write!(f, "characteristic discovery for {}", service)
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnumerationError {
    #[error("{operation} failed: {source}")]
    Radio {
        operation: GattOperation,
        #[source]
        source: RadioError,
    },
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: GattOperation,
        after: Duration,
    },
}

pub struct GattEnumerator {
    radio: Arc<dyn RadioStack>,
    timeout: Duration,
}

impl GattEnumerator {
    /// `timeout` bounds each individual radio call
    pub fn new(radio: Arc<dyn RadioStack>, timeout: Duration) -> Self {
        Self { radio, timeout }
    }

    /// Walk the profile of the report's device, filling the report as each
    /// call returns. On error the report keeps what was gathered so far.
    pub async fn enumerate(&self, report: &mut DiscoveryReport) -> Result<(), EnumerationError> {
        let address = report.address();

        let services = self
            .call(GattOperation::GetServices, self.radio.get_services(address))
            .await?;
        debug!(%address, "Found {} service(s)", services.len());
        report.record_service_count(services.len());

        for service in services {
            let characteristics = self
                .call(
                    GattOperation::GetCharacteristics(service.uuid),
                    self.radio.get_characteristics(address, service.uuid),
                )
                .await?;
            debug!(
                %address,
                service = %service.uuid,
                "Found {} characteristic(s)",
                characteristics.len()
            );
            report.push_service(service.uuid, characteristics);
        }

        Ok(())
    }

    async fn call<T>(
        &self,
        operation: GattOperation,
        request: impl Future<Output = Result<T, RadioError>>,
    ) -> Result<T, EnumerationError> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(EnumerationError::Radio { operation, source }),
            Err(_) => Err(EnumerationError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}
