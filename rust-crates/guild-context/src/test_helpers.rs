//! Scriptable dashboard backend for tests.
//!
//! Every request the server receives is forwarded to the test as an
//! [`ApiRequest`] carrying a oneshot responder, so the test decides whether
//! and when each request is answered.
use crate::{
    guild::{
        AuthenticatedUser,
        Guild,
        Profile,
    },
    header_binder::GUILD_HEADER,
};
use actix_web::{
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    error::ErrorInternalServerError,
    http::StatusCode,
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::TcpListener,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

/// Answer for a forwarded request: a JSON body, or a bare status code.
pub type Reply<T> = oneshot::Sender<Result<T, u16>>;

#[derive(Debug)]
pub enum ApiRequest {
    ListGuilds {
        principal: String,
        reply: Reply<Vec<Guild>>,
    },
    Profile {
        tenant: String,
        guild_header: Option<String>,
        reply: Reply<Profile>,
    },
    CurrentUser {
        reply: Reply<AuthenticatedUser>,
    },
    Health {
        reply: Reply<()>,
    },
    Query {
        family: String,
        subject: Option<String>,
        guild_header: Option<String>,
        reply: Reply<serde_json::Value>,
    },
}

pub struct MockDashboardApi {
    receiver: mpsc::Receiver<ApiRequest>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl MockDashboardApi {
    pub fn start() -> crate::Result<Self> {
        let (sender, receiver) = mpsc::channel(64);

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .context("failed to bind HTTP listener for mock dashboard api")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{address}");

        tracing::info!("mock dashboard api listening on {base_url}");

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(sender.clone()))
                .route("/tenants", web::get().to(handle_tenants))
                .route("/profile", web::get().to(handle_profile))
                .route("/auth/me", web::get().to(handle_current_user))
                .route("/health", web::get().to(handle_health))
                .route("/{family}", web::get().to(handle_query))
        })
        .workers(1)
        .shutdown_timeout(1)
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn next_request(&mut self) -> crate::Result<ApiRequest> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("mock dashboard api closed"))
    }

    /// Like [`Self::next_request`], but answers auth and health checks on
    /// its own, logging `user` in.
    pub async fn next_app_request(
        &mut self,
        user: &AuthenticatedUser,
    ) -> crate::Result<ApiRequest> {
        loop {
            match self.next_request().await? {
                ApiRequest::CurrentUser { reply } => {
                    let _ = reply.send(Ok(user.clone()));
                }
                ApiRequest::Health { reply } => {
                    let _ = reply.send(Ok(()));
                }
                request => return Ok(request),
            }
        }
    }
}

impl Drop for MockDashboardApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(false);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

type Requests = web::Data<mpsc::Sender<ApiRequest>>;

#[derive(Deserialize)]
struct PrincipalParams {
    principal: String,
}

#[derive(Deserialize)]
struct TenantParams {
    tenant: String,
}

#[derive(Deserialize)]
struct SubjectParams {
    subject: Option<String>,
}

fn guild_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(GUILD_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn forward<T: Serialize>(
    requests: &Requests,
    request: impl FnOnce(Reply<T>) -> ApiRequest,
) -> actix_web::Result<HttpResponse> {
    let (reply, response) = oneshot::channel();
    requests
        .get_ref()
        .send(request(reply))
        .await
        .map_err(|_| ErrorInternalServerError("mock dashboard api is not listening"))?;

    match response
        .await
        .map_err(|_| ErrorInternalServerError("mock responder dropped"))?
    {
        Ok(body) => Ok(HttpResponse::Ok().json(body)),
        Err(code) => {
            let status = StatusCode::from_u16(code).map_err(ErrorInternalServerError)?;
            Ok(HttpResponse::build(status).body(status.to_string()))
        }
    }
}

async fn handle_tenants(
    requests: Requests,
    params: web::Query<PrincipalParams>,
) -> actix_web::Result<HttpResponse> {
    let principal = params.into_inner().principal;
    forward(&requests, |reply| ApiRequest::ListGuilds { principal, reply }).await
}

async fn handle_profile(
    requests: Requests,
    req: HttpRequest,
    params: web::Query<TenantParams>,
) -> actix_web::Result<HttpResponse> {
    let tenant = params.into_inner().tenant;
    let guild_header = guild_header(&req);
    forward(&requests, |reply| ApiRequest::Profile {
        tenant,
        guild_header,
        reply,
    })
    .await
}

async fn handle_current_user(requests: Requests) -> actix_web::Result<HttpResponse> {
    forward(&requests, |reply| ApiRequest::CurrentUser { reply }).await
}

async fn handle_health(requests: Requests) -> actix_web::Result<HttpResponse> {
    forward(&requests, |reply| ApiRequest::Health { reply }).await
}

async fn handle_query(
    requests: Requests,
    req: HttpRequest,
    family: web::Path<String>,
    params: web::Query<SubjectParams>,
) -> actix_web::Result<HttpResponse> {
    let family = family.into_inner();
    let subject = params.into_inner().subject;
    let guild_header = guild_header(&req);
    forward(&requests, |reply| ApiRequest::Query {
        family,
        subject,
        guild_header,
        reply,
    })
    .await
}
