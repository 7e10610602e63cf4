use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use brewdesk_contracts::{
    BaristaChange, DeletedEnvelope, Drink, DrinkId, DrinksEnvelope, ErrorBody, RecipeLine, Role,
    RoleKind, RolesEnvelope, User, UserId, UsersEnvelope,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// HS256 secret the mock backend verifies bearer tokens with.
pub const SIGNING_SECRET: &[u8] = b"brewdesk-smoke-secret";

/// In-process stand-in for the coffee shop API: the drink catalog plus the
/// staff management endpoints, with per-endpoint permission checks.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<Catalog>>,
    hits: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Catalog {
    next_id: i64,
    drinks: BTreeMap<i64, Drink>,
    users: Vec<User>,
    roles: HashMap<UserId, Vec<Role>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drink(self, title: &str, recipe: Vec<RecipeLine>) -> Self {
        {
            let mut catalog = self.catalog();
            catalog.next_id += 1;
            let id = catalog.next_id;
            catalog.drinks.insert(
                id,
                Drink {
                    id: Some(DrinkId(id)),
                    title: title.to_string(),
                    recipe,
                },
            );
        }
        self
    }

    pub fn with_user(self, user_id: &str, name: &str, roles: &[&str]) -> Self {
        {
            let mut catalog = self.catalog();
            let user_id = UserId::from(user_id);
            catalog.users.push(User {
                user_id: user_id.clone(),
                email: Some(format!("{}@brewdesk.test", name.to_lowercase())),
                name: Some(name.to_string()),
                nickname: None,
                picture: None,
                profile: serde_json::Map::new(),
            });
            catalog
                .roles
                .insert(user_id, roles.iter().map(|name| role(name)).collect());
        }
        self
    }

    /// Number of requests that reached a route handler.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn drink_titles(&self) -> Vec<String> {
        self.catalog()
            .drinks
            .values()
            .map(|drink| drink.title.clone())
            .collect()
    }

    pub fn role_names(&self, user_id: &str) -> Vec<String> {
        self.catalog()
            .roles
            .get(&UserId::from(user_id))
            .map(|roles| roles.iter().map(|role| role.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/drinks-detail", get(list_drinks))
            .route("/drinks", axum::routing::post(create_drink))
            .route("/drinks/{id}", patch(update_drink).delete(delete_drink))
            .route("/users", get(list_users))
            .route("/users/{id}/roles", get(user_roles))
            .route("/baristas/{id}", patch(change_barista))
            .with_state(self.clone())
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn authorize(&self, headers: &HeaderMap, permission: &str) -> Result<(), Response> {
        self.hits.fetch_add(1, Ordering::SeqCst);

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                error(
                    StatusCode::UNAUTHORIZED,
                    "Authorization header is expected",
                )
            })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        let claims = decode::<Value>(
            token,
            &DecodingKey::from_secret(SIGNING_SECRET),
            &validation,
        )
        .map_err(|_| error(StatusCode::UNAUTHORIZED, "Unable to parse authentication token."))?
        .claims;

        let granted = claims
            .get("permissions")
            .and_then(Value::as_array)
            .is_some_and(|perms| perms.iter().any(|p| p.as_str() == Some(permission)));
        if !granted {
            return Err(error(
                StatusCode::FORBIDDEN,
                "You do not have needed presmissions to complete this action",
            ));
        }
        Ok(())
    }
}

fn role(name: &str) -> Role {
    Role {
        id: Some(format!("rol_{}", name.to_lowercase())),
        name: name.to_string(),
        description: None,
        kind: RoleKind::classify(name),
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: Some(status.as_u16()),
            message: Some(message.to_string()),
        }),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    error(StatusCode::BAD_REQUEST, &message)
}

fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "resource not found")
}

fn validate_recipe(recipe: &[RecipeLine]) -> Result<(), Response> {
    if recipe.is_empty() {
        return Err(bad_request("Field recipe is required".to_string()));
    }
    for (index, line) in recipe.iter().enumerate() {
        let index = index + 1;
        if line.name.trim().is_empty() {
            return Err(bad_request(format!(
                "Field name of ingredient {} is required",
                index
            )));
        }
        if line.color.trim().is_empty() {
            return Err(bad_request(format!(
                "Field color of ingredient {} is required",
                index
            )));
        }
        if line.parts <= 0.0 {
            return Err(bad_request(format!(
                "Field parts of ingredient {} is required",
                index
            )));
        }
    }
    Ok(())
}

fn title_taken(catalog: &Catalog, title: &str, except: Option<i64>) -> bool {
    catalog
        .drinks
        .iter()
        .any(|(id, drink)| Some(*id) != except && drink.title == title)
}

async fn list_drinks(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    if let Err(denied) = backend.authorize(&headers, "get:drinks-detail") {
        return denied;
    }
    let drinks = backend.catalog().drinks.values().cloned().collect();
    Json(DrinksEnvelope {
        success: true,
        drinks,
    })
    .into_response()
}

async fn create_drink(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Drink>,
) -> Response {
    if let Err(denied) = backend.authorize(&headers, "post:drinks") {
        return denied;
    }
    if body.title.trim().is_empty() {
        return bad_request("Field title is required".to_string());
    }
    if let Err(invalid) = validate_recipe(&body.recipe) {
        return invalid;
    }

    let mut catalog = backend.catalog();
    if title_taken(&catalog, &body.title, None) {
        return bad_request(format!("Field title with {} already exists", body.title));
    }
    catalog.next_id += 1;
    let id = catalog.next_id;
    let drink = Drink {
        id: Some(DrinkId(id)),
        title: body.title,
        recipe: body.recipe,
    };
    catalog.drinks.insert(id, drink.clone());

    Json(DrinksEnvelope {
        success: true,
        drinks: vec![drink],
    })
    .into_response()
}

async fn update_drink(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Drink>,
) -> Response {
    if let Err(denied) = backend.authorize(&headers, "patch:drinks") {
        return denied;
    }
    if body.title.trim().is_empty() && body.recipe.is_empty() {
        return bad_request("Field recipe/title is required".to_string());
    }
    if !body.recipe.is_empty()
        && let Err(invalid) = validate_recipe(&body.recipe)
    {
        return invalid;
    }

    let mut catalog = backend.catalog();
    if !catalog.drinks.contains_key(&id) {
        return not_found();
    }
    if !body.title.trim().is_empty() && title_taken(&catalog, &body.title, Some(id)) {
        return bad_request(format!("Field title with {} already exists", body.title));
    }

    let Some(drink) = catalog.drinks.get_mut(&id) else {
        return not_found();
    };
    if !body.title.trim().is_empty() {
        drink.title = body.title;
    }
    if !body.recipe.is_empty() {
        drink.recipe = body.recipe;
    }
    let updated = drink.clone();

    Json(DrinksEnvelope {
        success: true,
        drinks: vec![updated],
    })
    .into_response()
}

async fn delete_drink(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(denied) = backend.authorize(&headers, "delete:drinks") {
        return denied;
    }
    if backend.catalog().drinks.remove(&id).is_none() {
        return not_found();
    }
    Json(DeletedEnvelope {
        success: true,
        delete: DrinkId(id),
    })
    .into_response()
}

async fn list_users(State(backend): State<MockBackend>, headers: HeaderMap) -> Response {
    if let Err(denied) = backend.authorize(&headers, "manage:baristas") {
        return denied;
    }
    let users = backend.catalog().users.clone();
    Json(UsersEnvelope {
        success: true,
        users,
    })
    .into_response()
}

async fn user_roles(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(denied) = backend.authorize(&headers, "manage:baristas") {
        return denied;
    }
    let Some(roles) = backend.catalog().roles.get(&UserId(id)).cloned() else {
        return not_found();
    };
    Json(RolesEnvelope {
        success: true,
        roles,
    })
    .into_response()
}

async fn change_barista(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(change): Json<BaristaChange>,
) -> Response {
    if let Err(denied) = backend.authorize(&headers, "manage:baristas") {
        return denied;
    }

    let mut catalog = backend.catalog();
    let Some(roles) = catalog.roles.get_mut(&UserId(id.clone())) else {
        return not_found();
    };
    let is_barista = roles.iter().any(|role| role.kind == RoleKind::Barista);

    match (change.to_fire_barista, is_barista) {
        (true, false) => return bad_request(format!("User {} is not a barista", id)),
        (false, true) => return bad_request(format!("User {} is already a barista", id)),
        (true, true) => roles.retain(|role| role.kind != RoleKind::Barista),
        (false, false) => roles.push(role("Barista")),
    }

    Json(serde_json::json!({"success": true})).into_response()
}

pub async fn spawn_server(
    app: Router,
) -> std::io::Result<(SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok((addr, shutdown_tx, handle))
}
