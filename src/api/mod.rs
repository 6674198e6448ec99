use crate::auth::{AuthMiddleware, UsersStore};
use crate::config::AuthConfig;
use crate::job_queue::JobQueue;
use crate::monitor::ResourceMonitor;
use poem::middleware::{CookieJarManager, Cors};
use poem::{EndpointExt, Route};
use poem_openapi::{OpenApiService, Tags};
use std::sync::Arc;

pub mod healthcheck;
pub mod login;
pub mod store;

#[derive(Tags)]
pub enum ApiTags {
    Store,
    Login,
    HealthCheck,
}

/// Dependencies handed to every `#[OpenApi]` surface, injected explicitly
/// rather than fetched from a process-wide registry (spec §9 redesign note
/// on the source's context-registry singleton).
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub auth_config: Arc<AuthConfig>,
    pub users_store: Arc<dyn UsersStore>,
    pub monitor: Arc<dyn ResourceMonitor>,
}

type Apis = (store::StoreApi, login::LoginApi, healthcheck::HealthcheckApi);

pub fn make_open_api_service(state: &AppState) -> OpenApiService<Apis, ()> {
    OpenApiService::new(
        (
            store::StoreApi {
                queue: state.queue.clone(),
            },
            login::LoginApi {
                auth_config: state.auth_config.clone(),
                users_store: state.users_store.clone(),
            },
            healthcheck::HealthcheckApi {
                monitor: state.monitor.clone(),
            },
        ),
        "blob service API",
        env!("CARGO_PKG_VERSION"),
    )
}

/// Wires the OpenAPI service, Swagger UI, the bearer/cookie auth middleware
/// (allowlisting `/docs`, `/favicon.ico`, `/openapi.json`, `/users/login`
/// per spec §6), cookies, and CORS into one `poem::Route`.
pub fn combined_routes(state: &AppState) -> Route {
    let api_service = make_open_api_service(state);
    let ui = api_service.swagger_ui();
    let spec = api_service.spec_endpoint();

    let auth = AuthMiddleware {
        config: state.auth_config.clone(),
        users_store: state.users_store.clone(),
    };

    Route::new()
        .nest("/", api_service)
        .nest("/docs", ui)
        .nest("/openapi.json", spec)
        .with(auth)
        .with(CookieJarManager::new())
        .with(Cors::new())
}
