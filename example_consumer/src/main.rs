//! Example consumer: serves a `customer` model through architect-dbmod.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Without `DATABASE_URL` the in-memory store is used.
//!
//! ```text
//! curl -XPOST localhost:3000/api/v1/customer/save -d '{"name":"Acme","email":"OPS@ACME.IO","tier":"gold"}'
//! curl -XPOST localhost:3000/api/v1/customer/gets -d '{"take":10}'
//! curl -XPOST localhost:3000/api/v1/customer/GetByEmail -d '{"email":"ops@acme.io"}'
//! ```

use architect_dbmod::{
    app_router, open_store, pre_validate, AppError, AppState, DataModel, FieldRules, FilterOp, HookPayload,
    ModelDescriptor, ModelMethod, NamedQuery, RequestContext, ReturnKind, Service, ServiceConfig,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Customer {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    tier: String,
}

impl Customer {
    fn kx_pre_save(_: &RequestContext, payload: HookPayload<'_, Customer>) -> Result<(), AppError> {
        if let HookPayload::Model(c) = payload {
            c.email = c.email.trim().to_lowercase();
        }
        Ok(())
    }
}

impl DataModel for Customer {
    fn table_name() -> &'static str {
        "customers"
    }

    fn queries() -> Vec<NamedQuery> {
        vec![
            NamedQuery::new("Email", ReturnKind::Single).condition("email", FilterOp::Eq),
            NamedQuery::new("Tier", ReturnKind::Both).condition("tier", FilterOp::Eq),
        ]
    }

    fn methods() -> Vec<ModelMethod<Self>> {
        vec![ModelMethod::new("KxPreSave", Customer::kx_pre_save)]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("architect_dbmod=info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let store = open_store(config.database_url.as_deref(), config.max_connections).await?;

    let customers = ModelDescriptor::<Customer>::builder("customer")
        .hook("PostSave", |_, payload| {
            if let HookPayload::Model(c) = payload {
                tracing::info!(id = %c.id, "customer saved");
            }
            Ok(())
        })
        .disable_routes(["deletequery"])
        .build();

    let rules = FieldRules::new()
        .trim("name")
        .required("name")
        .allowed("tier", ["gold", "silver", "bronze", ""])
        .pattern("email", r"^[^@\s]+@[^@\s]+$")?;

    let registry = Service::new(config.base_point.clone())
        .model(customers)
        .middleware(pre_validate(rules.into_validate_fn()))
        .build()?;
    for path in registry.paths() {
        tracing::debug!(path, "route");
    }

    let app = app_router(AppState::new(registry, store), config.body_limit);
    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
