use std::sync::Arc;

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware, web::Data,
};
use clap::Parser;
use tracing::info;
use trust_operator::bundle_controller::{Settings, State, run};
use trust_operator::{fspkg, jks::DEFAULT_JKS_PASSWORD, leader, telemetry, webhook};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the default CA package JSON file; required for Bundles that
    /// set useDefaultCAs
    #[arg(long)]
    default_package_location: Option<String>,

    /// Namespace source ConfigMaps and Secrets are read from
    #[arg(long, default_value = "cert-manager")]
    trust_namespace: String,

    /// Listen address for the webhook and diagnostics server
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Run leader election before starting the controller
    #[arg(long)]
    leader_elect: bool,

    /// Lease name used for leader election
    #[arg(long, default_value = "trust-operator-lease")]
    lease_name: String,

    /// Log level filter, overridable via the LOG environment variable
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Password for generated JKS keystores
    #[arg(long, default_value = DEFAULT_JKS_PASSWORD)]
    jks_password: String,
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    let default_package = match &args.default_package_location {
        Some(path) => {
            let package = fspkg::load_package(path)
                .map_err(|err| anyhow::anyhow!("failed to load default CA package: {err}"))?;
            info!("loaded default CA package {} {}", package.name, package.version);
            Some(Arc::new(package))
        }
        None => None,
    };

    let state = State::new(Settings {
        trust_namespace: args.trust_namespace,
        jks_password: args.jks_password,
        default_package,
    });

    if args.leader_elect {
        let client = kube::Client::try_default().await?;
        let (leader_tx, mut leader_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(leader::LeaderElector::new(client, args.lease_name).run(leader_tx));
        while !*leader_rx.borrow() {
            leader_rx.changed().await?;
        }
        info!("acquired leadership lease");
    }

    let controller = run(state.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(index)
            .service(webhook::validate_handler)
    })
    .bind(&args.listen_addr)?
    .shutdown_timeout(5);

    // Both sides implement graceful shutdown, so poll until each is done
    let (_, server_result) = tokio::join!(controller, server.run());
    server_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    #[actix_web::test]
    async fn health_endpoint_reports_healthy() {
        let app = test::init_service(App::new().service(health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, "healthy");
    }

    #[actix_web::test]
    async fn index_endpoint_serves_diagnostics() {
        let state = State::default();
        let app =
            test::init_service(App::new().app_data(Data::new(state.clone())).service(index)).await;

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body.is_object(), "diagnostics should be a JSON object");
    }
}
