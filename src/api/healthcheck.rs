use crate::api::ApiTags;
use crate::monitor::{ResourceMonitor, ResourceSample};
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

#[derive(Debug, Clone, Object)]
pub struct HealthcheckResponse {
    pub status: String,
    pub resources: ResourceSampleDto,
}

#[derive(Debug, Clone, Object)]
pub struct ResourceSampleDto {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl From<ResourceSample> for ResourceSampleDto {
    fn from(sample: ResourceSample) -> Self {
        Self {
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
        }
    }
}

pub struct HealthcheckApi {
    pub monitor: Arc<dyn ResourceMonitor>,
}

#[OpenApi(prefix_path = "/", tag = ApiTags::HealthCheck)]
impl HealthcheckApi {
    #[oai(path = "/healthcheck", method = "get", operation_id = "healthcheck")]
    async fn healthcheck(&self) -> Json<HealthcheckResponse> {
        Json(HealthcheckResponse {
            status: "ok".to_string(),
            resources: self.monitor.last_sample().into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use poem_openapi::OpenApiService;

    struct FakeMonitor(ResourceSample);

    #[async_trait]
    impl ResourceMonitor for FakeMonitor {
        fn last_sample(&self) -> ResourceSample {
            self.0
        }
        async fn run(self: Arc<Self>) {}
    }

    #[tokio::test]
    async fn healthcheck_reports_the_monitor_s_last_sample() {
        let monitor: Arc<dyn ResourceMonitor> = Arc::new(FakeMonitor(ResourceSample {
            cpu_percent: 12.5,
            memory_percent: 40.0,
        }));
        let api = HealthcheckApi { monitor };
        let api_service = OpenApiService::new(api, "blob service API", "test");
        let client = TestClient::new(poem::Route::new().nest("/", api_service));

        let resp = client.get("/healthcheck").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::OK.as_u16());
        let body = resp.0.into_body().into_bytes().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"status\":\"ok\""));
        assert!(text.contains("\"cpu_percent\":12.5"));
    }
}
