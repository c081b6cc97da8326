//! Typed client for a GPU compute provider.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::rest::{decode, RestClient};
use crate::clients::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuProvider {
    Aws,
    Gcp,
    Azure,
}

impl GpuProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuProvider::Aws => "aws",
            GpuProvider::Gcp => "gcp",
            GpuProvider::Azure => "azure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    Pending,
    Running,
    Stopped,
    Error,
    Terminated,
}

impl PodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::Pending => "pending",
            PodStatus::Running => "running",
            PodStatus::Stopped => "stopped",
            PodStatus::Error => "error",
            PodStatus::Terminated => "terminated",
        }
    }
}

/// One GPU offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuAvailability {
    pub gpu_type: String,
    pub provider: GpuProvider,
    pub region: String,
    #[serde(default)]
    pub available: u32,
    #[serde(default)]
    pub price_per_hour: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub id: String,
    pub name: String,
    pub gpu_type: String,
    pub provider: GpuProvider,
    pub region: String,
    pub status: PodStatus,
    #[serde(default)]
    pub image: Option<String>,
}

/// Request body for [`ComputeClient::create_pod`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePod {
    pub name: String,
    pub gpu_type: String,
    pub provider: GpuProvider,
    pub region: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// GPU availability and pod lifecycle calls.
///
/// Reads go through the shared cache; creating or deleting a pod drops the
/// cached listing and the cached pod so the next read sees the change.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    rest: RestClient,
}

impl ComputeClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub async fn gpu_availability(
        &self,
        provider: Option<GpuProvider>,
        region: Option<&str>,
    ) -> ClientResult<Vec<GpuAvailability>> {
        let mut query = Vec::new();
        if let Some(provider) = provider {
            query.push(("provider", provider.as_str().to_string()));
        }
        if let Some(region) = region {
            query.push(("region", region.to_string()));
        }
        self.rest.get_as("availability/gpu", &query).await
    }

    pub async fn pods(&self, status: Option<PodStatus>) -> ClientResult<Vec<Pod>> {
        let query: Vec<_> = status
            .map(|s| ("status", s.as_str().to_string()))
            .into_iter()
            .collect();
        self.rest.get_as("pods", &query).await
    }

    pub async fn pod(&self, pod_id: &str) -> ClientResult<Pod> {
        self.rest.get_as(&format!("pods/{}", pod_id), &[]).await
    }

    pub async fn create_pod(&self, request: &CreatePod) -> ClientResult<Pod> {
        let body = serde_json::to_value(request).map_err(ClientError::Encode)?;
        let value = self.rest.post("pods", &body).await?;
        self.forget_listing();
        decode("create_pod", value)
    }

    pub async fn delete_pod(&self, pod_id: &str) -> ClientResult<Value> {
        let path = format!("pods/{}", pod_id);
        let value = self.rest.delete(&path).await?;
        self.rest.invalidate(&path, &[]);
        self.forget_listing();
        Ok(value)
    }

    fn forget_listing(&self) {
        self.rest.invalidate("pods", &[]);
        for status in [
            PodStatus::Pending,
            PodStatus::Running,
            PodStatus::Stopped,
            PodStatus::Error,
            PodStatus::Terminated,
        ] {
            self.rest
                .invalidate("pods", &[("status", status.as_str().to_string())]);
        }
    }
}
