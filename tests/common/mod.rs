#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request, Response},
    Router,
};
use dashmap::DashMap;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::Value;
use storefront_api::{
    auth::TokenKeys,
    config::AppConfig,
    db::{self, DbConfig},
    entities::order::{Entity as OrderEntity, Model as OrderModel},
    events,
    gateway::{
        GatewayError, GatewayTransaction, InitializeTransaction, InitializedTransaction,
        PaymentGateway,
    },
    reconciliation::{
        CallbackQuery, IdentityGate, ReconciliationFlow, ReconciliationOutcome,
    },
    services::{InitializePaymentRequest, LocalOrderBackend, OrderService, PaymentService},
    session::{CartItem, CheckoutSessionStore, ShippingInfo, SlotKind},
    AppState,
};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// In-process stand-in for the hosted gateway. Every initialized transaction
/// is paid unless a test overrides its status.
#[derive(Default)]
pub struct FakeGateway {
    transactions: DashMap<String, GatewayTransaction>,
    issued: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn set_status(&self, reference: &str, status: &str, gateway_response: Option<&str>) {
        if let Some(mut tx) = self.transactions.get_mut(reference) {
            tx.status = status.to_string();
            tx.gateway_response = gateway_response.map(str::to_owned);
        }
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, GatewayError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("T{:06}", n);
        self.transactions.insert(
            reference.clone(),
            GatewayTransaction {
                reference: reference.clone(),
                status: "success".to_string(),
                amount: request.amount,
                currency: Some(request.currency.clone()),
                gateway_response: Some("Approved".to_string()),
                metadata: Some(request.metadata.clone()),
                paid_at: None,
            },
        );
        Ok(InitializedTransaction {
            authorization_url: format!("https://pay.test/{}", reference),
            access_code: Some(format!("ac_{}", n)),
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayTransaction, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .get(reference)
            .map(|tx| tx.value().clone())
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                message: "Transaction reference not found".to_string(),
            })
    }
}

/// Application wired to an in-memory SQLite database, in-memory session slots
/// and the fake gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub tokens: TokenKeys,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_sessions(Arc::new(CheckoutSessionStore::in_memory("storefront:test"))).await
    }

    pub async fn with_sessions(sessions: Arc<CheckoutSessionStore>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.currency = "NGN".to_string();
        cfg.jwt_secret = Some(JWT_SECRET.to_string());
        cfg.verify_timeout_secs = 5;
        cfg.create_order_timeout_secs = 5;

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let payments = PaymentService::new(
            gateway.clone(),
            sessions.clone(),
            cfg.callback_url(),
            cfg.currency.clone(),
            Some(event_sender.clone()),
        );
        let orders = OrderService::new(db_arc.clone(), cfg.currency.clone());
        let tokens = TokenKeys::new(JWT_SECRET);

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            sessions,
            payments,
            orders,
            tokens: Some(tokens.clone()),
            event_sender: Some(event_sender),
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            tokens,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, String)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    /// Runs checkout through the payment service and returns (session id, reference).
    pub async fn checkout(&self, session_id: &str) -> (String, String) {
        let initialized = self
            .state
            .payments
            .initialize(checkout_request(Some(session_id)))
            .await
            .expect("checkout should initialize");
        (initialized.session_id, initialized.reference)
    }

    /// A fresh flow for one callback, as the handler builds it.
    pub fn flow(&self, user: Option<String>) -> ReconciliationFlow {
        let backend = LocalOrderBackend::new(self.state.payments.clone(), self.state.orders.clone());
        ReconciliationFlow::new(
            Arc::new(backend),
            self.state.sessions.clone(),
            IdentityGate::resolved(user),
            self.state.config.flow_settings(),
        )
    }

    pub async fn callback(&self, reference: &str, session_id: Option<&str>) -> ReconciliationOutcome {
        let query: CallbackQuery = [("reference", reference), ("trxref", reference)]
            .into_iter()
            .collect();
        self.flow(None)
            .run(&query, session_id)
            .await
            .expect("fresh flow should run")
    }

    pub async fn order_count(&self) -> u64 {
        OrderEntity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn order_for(&self, reference: &str) -> Option<OrderModel> {
        self.state
            .orders
            .find_by_reference(reference)
            .await
            .expect("lookup order")
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.state
            .sessions
            .read_cart(SlotKind::Durable, session_id)
            .await
            .is_some()
            || self
                .state
                .sessions
                .read_cart(SlotKind::Volatile, session_id)
                .await
                .is_some()
    }

    pub fn bearer_for(&self, user_id: &str) -> String {
        let token = self
            .tokens
            .issue(user_id, None, Duration::from_secs(300))
            .expect("issue token");
        format!("Bearer {}", token)
    }
}

pub fn shipping_info() -> ShippingInfo {
    ShippingInfo {
        full_name: "Amaka Obi".to_string(),
        email: "amaka@example.com".to_string(),
        phone: "08031234567".to_string(),
        address: "14 Admiralty Way".to_string(),
        city: "Lagos".to_string(),
        region: Some("Lagos".to_string()),
        postal_code: Some("106104".to_string()),
        country: "NG".to_string(),
    }
}

pub fn cart_items() -> Vec<CartItem> {
    vec![
        CartItem {
            product_id: "home-2024".to_string(),
            name: "Home Jersey 2024".to_string(),
            price: dec!(45.00),
            quantity: 2,
            image: Some("/img/home-2024.png".to_string()),
            size: Some("L".to_string()),
            color_id: Some("green".to_string()),
        },
        CartItem {
            product_id: "scarf".to_string(),
            name: "Supporters Scarf".to_string(),
            price: dec!(12.50),
            quantity: 1,
            image: None,
            size: None,
            color_id: None,
        },
    ]
}

pub fn checkout_request(session_id: Option<&str>) -> InitializePaymentRequest {
    InitializePaymentRequest {
        email: "amaka@example.com".to_string(),
        session_id: session_id.map(str::to_owned),
        shipping_info: shipping_info(),
        cart_items: cart_items(),
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
