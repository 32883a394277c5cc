//! [`CajaStore`] backed by a hosted Supabase (PostgREST) project.
//!
//! Reads use PostgREST embedded selects whose JSON shapes are deserialized
//! into private structs and flattened into the typed rows the controllers
//! expect. Multi-write operations call Postgres functions through
//! `/rest/v1/rpc/*` (see `supabase/rpc.sql`) so each runs in one database
//! transaction. Passwords are verified by the hosted auth service
//! (`/auth/v1/*`); the access token it returns replaces the anon key on
//! every later request so row-level security applies to the user.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SupabaseConfig;
use crate::error::{CajaError, Result};
use crate::models::{
    Apertura, AperturaHistoryRow, Arqueo, ArqueoHistoryRow, Caja, NewRecepcion, NewShift,
    NewTraslado, OpenTurno, Profile, Recepcion, RecepcionHistoryRow, ShiftClosure, Traslado,
    TrasladoEstado, TrasladoHistoryRow, Turno, TurnoEstado,
};
use crate::money::round_currency;
use crate::store::{AuthenticatedUser, CajaStore, ProfileCredentials};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const SELECT_APERTURA_HISTORY: &str =
    "id,monto_inicial,fecha_hora,cerrada,turnos!inner(cajas(nombre),profiles(nombre_completo))";
const SELECT_ARQUEO_HISTORY: &str = "id,monto_contado,diferencia,fecha_hora,\
     aperturas!inner(turnos!inner(cajas(nombre),profiles(nombre_completo)))";
const SELECT_TRASLADO_HISTORY: &str = "id,monto,estado,fecha_hora_envio,\
     caja_origen:cajas!traslados_caja_origen_id_fkey(nombre),\
     caja_destino:cajas!traslados_caja_destino_id_fkey(nombre),\
     arqueos!inner(aperturas!inner(turnos!inner(profiles(nombre_completo))))";
const SELECT_RECEPCION_HISTORY: &str = "id,monto_recibido,diferencia,fecha_hora,\
     profiles!recepciones_usuario_receptor_id_fkey(nombre_completo),\
     traslados!inner(caja_destino:cajas!traslados_caja_destino_id_fkey(nombre))";

// ---------------------------------------------------------------------------
// Embedded JSON shapes
// ---------------------------------------------------------------------------

/// PostgREST returns a to-one embed as an object and a to-many embed as an
/// array depending on how it detects the relationship; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            Self::Many(items) => items.into_iter().next(),
            Self::One(item) => Some(item),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NombreRef {
    nombre: String,
}

#[derive(Debug, Deserialize)]
struct ProfileRef {
    nombre_completo: String,
}

#[derive(Debug, Deserialize)]
struct OpenTurnoJson {
    id: String,
    usuario_id: String,
    caja_id: String,
    fecha: NaiveDate,
    hora_inicio: String,
    #[serde(default)]
    hora_fin: Option<String>,
    estado: TurnoEstado,
    created_at: DateTime<Utc>,
    cajas: Caja,
    #[serde(default)]
    aperturas: Option<OneOrMany<Apertura>>,
}

#[derive(Debug, Deserialize)]
struct TurnoNamesJson {
    cajas: NombreRef,
    profiles: ProfileRef,
}

#[derive(Debug, Deserialize)]
struct AperturaHistoryJson {
    id: String,
    monto_inicial: Decimal,
    fecha_hora: DateTime<Utc>,
    cerrada: bool,
    turnos: TurnoNamesJson,
}

#[derive(Debug, Deserialize)]
struct AperturaTurnoNamesJson {
    turnos: TurnoNamesJson,
}

#[derive(Debug, Deserialize)]
struct ArqueoHistoryJson {
    id: String,
    monto_contado: Decimal,
    diferencia: Decimal,
    fecha_hora: DateTime<Utc>,
    aperturas: AperturaTurnoNamesJson,
}

#[derive(Debug, Deserialize)]
struct TurnoProfileJson {
    profiles: ProfileRef,
}

#[derive(Debug, Deserialize)]
struct AperturaTurnoProfileJson {
    turnos: TurnoProfileJson,
}

#[derive(Debug, Deserialize)]
struct ArqueoAperturaJson {
    aperturas: AperturaTurnoProfileJson,
}

#[derive(Debug, Deserialize)]
struct TrasladoHistoryJson {
    id: String,
    monto: Decimal,
    estado: String,
    fecha_hora_envio: DateTime<Utc>,
    caja_origen: NombreRef,
    caja_destino: NombreRef,
    arqueos: ArqueoAperturaJson,
}

#[derive(Debug, Deserialize)]
struct TrasladoDestinoJson {
    caja_destino: NombreRef,
}

#[derive(Debug, Deserialize)]
struct RecepcionHistoryJson {
    id: String,
    monto_recibido: Decimal,
    diferencia: Decimal,
    fecha_hora: DateTime<Utc>,
    profiles: ProfileRef,
    traslados: TrasladoDestinoJson,
}

#[derive(Debug, Deserialize)]
struct TurnoCajaJson {
    caja_id: String,
}

#[derive(Debug, Deserialize)]
struct AperturaTurnoCajaJson {
    turnos: TurnoCajaJson,
}

#[derive(Debug, Deserialize)]
struct ArqueoCajaJson {
    aperturas: AperturaTurnoCajaJson,
}

#[derive(Debug, Deserialize)]
struct OpenShiftRpcJson {
    turno: Turno,
    apertura: Apertura,
}

#[derive(Debug, Deserialize)]
struct ParametroJson {
    valor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HostedUserJson {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponseJson {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix seconds; newer auth servers send it next to `expires_in`.
    #[serde(default)]
    expires_at: Option<i64>,
    user: HostedUserJson,
}

/// Outcome of a password grant.
#[derive(Debug, Clone)]
struct HostedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    user: HostedUserJson,
}

// ---------------------------------------------------------------------------
// Shape -> row conversions
// ---------------------------------------------------------------------------

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| CajaError::store(format!("unexpected {what} payload: {e}")))
}

fn parse_open_turnos(value: Value) -> Result<Vec<OpenTurno>> {
    let rows: Vec<OpenTurnoJson> = decode("turnos", value)?;
    Ok(rows
        .into_iter()
        .map(|t| OpenTurno {
            turno: Turno {
                id: t.id,
                usuario_id: t.usuario_id,
                caja_id: t.caja_id,
                fecha: t.fecha,
                hora_inicio: t.hora_inicio,
                hora_fin: t.hora_fin,
                estado: t.estado,
                created_at: t.created_at,
            },
            caja: t.cajas,
            apertura: t.aperturas.and_then(OneOrMany::into_first).map(|mut a| {
                a.monto_inicial = round_currency(a.monto_inicial);
                a
            }),
        })
        .collect())
}

fn parse_apertura_history(value: Value) -> Result<Vec<AperturaHistoryRow>> {
    let rows: Vec<AperturaHistoryJson> = decode("aperturas history", value)?;
    Ok(rows
        .into_iter()
        .map(|a| AperturaHistoryRow {
            id: a.id,
            monto_inicial: round_currency(a.monto_inicial),
            fecha_hora: a.fecha_hora,
            cerrada: a.cerrada,
            caja_nombre: a.turnos.cajas.nombre,
            usuario_nombre: a.turnos.profiles.nombre_completo,
        })
        .collect())
}

fn parse_arqueo_history(value: Value) -> Result<Vec<ArqueoHistoryRow>> {
    let rows: Vec<ArqueoHistoryJson> = decode("arqueos history", value)?;
    Ok(rows
        .into_iter()
        .map(|a| ArqueoHistoryRow {
            id: a.id,
            monto_contado: round_currency(a.monto_contado),
            diferencia: round_currency(a.diferencia),
            fecha_hora: a.fecha_hora,
            caja_nombre: a.aperturas.turnos.cajas.nombre,
            usuario_nombre: a.aperturas.turnos.profiles.nombre_completo,
        })
        .collect())
}

fn parse_traslado_history(value: Value) -> Result<Vec<TrasladoHistoryRow>> {
    let rows: Vec<TrasladoHistoryJson> = decode("traslados history", value)?;
    Ok(rows
        .into_iter()
        .map(|t| TrasladoHistoryRow {
            id: t.id,
            monto: round_currency(t.monto),
            estado: TrasladoEstado::parse(&t.estado),
            fecha_hora_envio: t.fecha_hora_envio,
            caja_origen_nombre: t.caja_origen.nombre,
            caja_destino_nombre: t.caja_destino.nombre,
            usuario_nombre: t.arqueos.aperturas.turnos.profiles.nombre_completo,
        })
        .collect())
}

fn parse_recepcion_history(value: Value) -> Result<Vec<RecepcionHistoryRow>> {
    let rows: Vec<RecepcionHistoryJson> = decode("recepciones history", value)?;
    Ok(rows
        .into_iter()
        .map(|r| RecepcionHistoryRow {
            id: r.id,
            monto_recibido: round_currency(r.monto_recibido),
            diferencia: round_currency(r.diferencia),
            fecha_hora: r.fecha_hora,
            caja_destino_nombre: r.traslados.caja_destino.nombre,
            usuario_nombre: r.profiles.nombre_completo,
        })
        .collect())
}

fn parse_token_response(value: Value, now: DateTime<Utc>) -> Result<HostedToken> {
    let token: TokenResponseJson = decode("token", value)?;
    let expires_at = token
        .expires_at
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .or_else(|| {
            token
                .expires_in
                .map(|secs| now + chrono::Duration::seconds(secs))
        });
    Ok(HostedToken {
        access_token: token.access_token,
        expires_at,
        user: token.user,
    })
}

/// Profile fallback built from the auth user when no `profiles` row is
/// visible yet.
fn profile_from_user(user: &HostedUserJson) -> Profile {
    let meta = |key: &str| {
        user.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let email = user.email.clone().unwrap_or_default();
    Profile {
        id: user.id.clone(),
        nombre_completo: meta("nombre_completo")
            .or_else(|| meta("full_name"))
            .unwrap_or_else(|| email.clone()),
        rol: meta("rol").unwrap_or_else(|| "cajero".to_string()),
        email,
    }
}

/// Sign-up answers with the user itself, or with a session wrapping it when
/// e-mail confirmation is off.
fn parse_signup_response(value: Value) -> Result<Profile> {
    let user_value = match value.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => value,
    };
    let user: HostedUserJson = decode("signup", user_value)?;
    Ok(profile_from_user(&user))
}

fn auth_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| {
            parsed
                .as_ref()
                .and_then(|v| v.get(*key))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// PostgREST `insert` / `rpc` responses may be a single object or an array.
fn first_of<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    let item: OneOrMany<T> = decode(what, value)?;
    item.into_first()
        .ok_or_else(|| CajaError::store(format!("empty {what} response")))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    anon_key: String,
    /// JWT of the signed-in user; `None` falls back to the anon key.
    access_token: RwLock<Option<String>>,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CajaError::store(format!("HTTP client error: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(&config.url),
            anon_key: config.anon_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the signed-in user's JWT instead of the anon key for row-level
    /// security, or go back to the anon key with `None`.
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.clone().unwrap_or_else(|| self.anon_key.clone())
    }

    fn auth_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/auth/v1/{path}", self.base_url))
            .map_err(|e| CajaError::store(format!("Invalid Supabase URL: {e}")))?;
        if !params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// POST to the auth service. Rejected credentials become `Auth` errors.
    async fn auth_post(&self, url: Url, body: &Value, bearer: Option<&str>) -> Result<Value> {
        let mut req = self
            .client
            .post(url.clone())
            .header("apikey", &self.anon_key)
            .json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        debug!(path = url.path(), "supabase auth request");
        let resp = req
            .send()
            .await
            .map_err(|e| CajaError::store(format!("Supabase auth request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::UNPROCESSABLE_ENTITY
        {
            let body = resp.text().await.unwrap_or_default();
            return Err(CajaError::auth(auth_error_message(&body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, path = url.path(), "supabase auth error response");
            return Err(CajaError::store(format!(
                "Supabase auth error ({status}): {}",
                auth_error_message(&body)
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json::<Value>()
            .await
            .map_err(|e| CajaError::store(format!("Supabase JSON parse error: {e}")))
    }

    fn rest_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{path}", self.base_url))
            .map_err(|e| CajaError::store(format!("Invalid Supabase URL: {e}")))?;
        if !params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        let bearer = self.bearer();
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            req = req.json(body);
        }

        debug!(method = %method, path = url.path(), "supabase request");
        let resp = req
            .send()
            .await
            .map_err(|e| CajaError::store(format!("Supabase request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, path = url.path(), "supabase error response");
            return Err(status_error(status, &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json::<Value>()
            .await
            .map_err(|e| CajaError::store(format!("Supabase JSON parse error: {e}")))
    }

    async fn select(&self, table: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.rest_url(table, params)?;
        self.send(Method::GET, url, None).await
    }

    async fn insert(&self, table: &str, body: &Value) -> Result<Value> {
        let url = self.rest_url(table, &[])?;
        self.send(Method::POST, url, Some(body)).await
    }

    async fn rpc(&self, function: &str, args: &Value) -> Result<Value> {
        let url = self.rest_url(&format!("rpc/{function}"), &[])?;
        self.send(Method::POST, url, Some(args)).await
    }

    async fn select_first<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let rows: Vec<T> = decode(table, self.select(table, params).await?)?;
        Ok(rows.into_iter().next())
    }
}

/// Strip trailing slashes and ensure a scheme.
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// Map a PostgREST error response onto the error taxonomy. Errors raised
/// by the rpc functions carry their SQLSTATE in `code`.
fn status_error(status: StatusCode, body: &str) -> CajaError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CajaError::auth(format!("Supabase rejected credentials ({status}): {message}"));
    }
    match code {
        // no_data_found raised by the rpc functions
        "P0002" => CajaError::not_found(message.to_string()),
        // check_violation / raise_exception used for business rules
        "23514" | "P0001" => CajaError::validation(message.to_string()),
        _ => CajaError::store(format!("Supabase error ({status}): {message}")),
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn unsupported_auth() -> CajaError {
    CajaError::auth("password hashes are not readable from the hosted auth service")
}

// ---------------------------------------------------------------------------
// CajaStore
// ---------------------------------------------------------------------------

impl CajaStore for SupabaseStore {
    async fn password_sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>> {
        let url = self.auth_url("token", &[("grant_type", "password")])?;
        let value = self
            .auth_post(url, &json!({ "email": email, "password": password }), None)
            .await?;
        let token = parse_token_response(value, Utc::now())?;
        self.set_access_token(Some(token.access_token.clone()));

        let profile = match self.get_profile(&token.user.id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(user_id = %token.user.id, "no profiles row visible, using auth user");
                profile_from_user(&token.user)
            }
            Err(e) => {
                self.set_access_token(None);
                return Err(e);
            }
        };
        info!(user_id = %profile.id, "hosted sign-in accepted");
        Ok(Some(AuthenticatedUser {
            profile,
            access_expires_at: token.expires_at,
        }))
    }

    async fn password_sign_up(
        &self,
        email: &str,
        password: &str,
        nombre_completo: &str,
    ) -> Result<Option<Profile>> {
        let url = self.auth_url("signup", &[])?;
        let value = self
            .auth_post(
                url,
                &json!({
                    "email": email,
                    "password": password,
                    "data": { "nombre_completo": nombre_completo },
                }),
                None,
            )
            .await?;
        let profile = parse_signup_response(value)?;
        info!(user_id = %profile.id, "hosted sign-up accepted");
        Ok(Some(profile))
    }

    async fn end_session(&self) {
        let token = self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(token) = token else {
            return;
        };
        let url = match self.auth_url("logout", &[]) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "hosted logout skipped");
                return;
            }
        };
        if let Err(e) = self.auth_post(url, &json!({}), Some(&token)).await {
            warn!(error = %e, "hosted logout failed, token dropped locally");
        }
    }

    async fn get_parametro(&self, clave: &str) -> Result<Option<String>> {
        let row: Option<ParametroJson> = self
            .select_first(
                "parametros",
                &[("select", "valor".into()), ("clave", eq(clave))],
            )
            .await?;
        Ok(row.map(|p| p.valor))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.select_first(
            "profiles",
            &[
                ("select", "id,email,nombre_completo,rol".into()),
                ("id", eq(user_id)),
            ],
        )
        .await
    }

    async fn find_credentials_by_email(&self, _email: &str) -> Result<Option<ProfileCredentials>> {
        Err(unsupported_auth())
    }

    async fn insert_profile(&self, _profile: &Profile, _password_hash: &str) -> Result<()> {
        Err(unsupported_auth())
    }

    async fn get_caja(&self, caja_id: &str) -> Result<Option<Caja>> {
        self.select_first("cajas", &[("select", "*".into()), ("id", eq(caja_id))])
            .await
    }

    async fn list_cajas(&self) -> Result<Vec<Caja>> {
        let value = self
            .select(
                "cajas",
                &[
                    ("select", "*".into()),
                    ("order", "es_principal.desc,nombre.asc".into()),
                ],
            )
            .await?;
        decode("cajas", value)
    }

    async fn open_turnos_for_user(&self, user_id: &str) -> Result<Vec<OpenTurno>> {
        let value = self
            .select(
                "turnos",
                &[
                    ("select", "*,cajas(*),aperturas(*)".into()),
                    ("usuario_id", eq(user_id)),
                    ("estado", eq("abierto")),
                    ("order", "created_at.desc".into()),
                ],
            )
            .await?;
        parse_open_turnos(value)
    }

    async fn open_shift(&self, shift: &NewShift) -> Result<(Turno, Apertura)> {
        let value = self
            .rpc(
                "abrir_turno",
                &json!({
                    "p_usuario_id": shift.usuario_id,
                    "p_caja_id": shift.caja_id,
                    "p_monto_inicial": shift.monto_inicial,
                }),
            )
            .await?;
        let opened: OpenShiftRpcJson = first_of("abrir_turno", value)?;
        Ok((opened.turno, opened.apertura))
    }

    async fn close_shift(&self, closure: &ShiftClosure) -> Result<Arqueo> {
        let value = self
            .rpc(
                "cerrar_turno",
                &json!({
                    "p_apertura_id": closure.apertura_id,
                    "p_turno_id": closure.turno_id,
                    "p_monto_contado": closure.monto_contado,
                    "p_monto_esperado": closure.monto_esperado,
                    "p_diferencia": closure.diferencia,
                    "p_comentario": closure.comentario,
                    "p_hora_fin": closure.hora_fin,
                }),
            )
            .await?;
        first_of("cerrar_turno", value)
    }

    async fn get_arqueo(&self, arqueo_id: &str) -> Result<Option<Arqueo>> {
        self.select_first("arqueos", &[("select", "*".into()), ("id", eq(arqueo_id))])
            .await
    }

    async fn caja_of_arqueo(&self, arqueo_id: &str) -> Result<Option<String>> {
        let row: Option<ArqueoCajaJson> = self
            .select_first(
                "arqueos",
                &[
                    (
                        "select",
                        "aperturas!inner(turnos!inner(caja_id))".into(),
                    ),
                    ("id", eq(arqueo_id)),
                ],
            )
            .await?;
        Ok(row.map(|r| r.aperturas.turnos.caja_id))
    }

    async fn traslado_for_arqueo(&self, arqueo_id: &str) -> Result<Option<Traslado>> {
        self.select_first(
            "traslados",
            &[("select", "*".into()), ("arqueo_id", eq(arqueo_id))],
        )
        .await
    }

    async fn insert_traslado(&self, traslado: &NewTraslado) -> Result<Traslado> {
        let value = self
            .insert(
                "traslados",
                &json!({
                    "arqueo_id": traslado.arqueo_id,
                    "caja_origen_id": traslado.caja_origen_id,
                    "caja_destino_id": traslado.caja_destino_id,
                    "monto": traslado.monto,
                    "estado": TrasladoEstado::EnTransito.as_str(),
                    "comentario": traslado.comentario,
                }),
            )
            .await?;
        first_of("traslados insert", value)
    }

    async fn get_traslado(&self, traslado_id: &str) -> Result<Option<Traslado>> {
        self.select_first(
            "traslados",
            &[("select", "*".into()), ("id", eq(traslado_id))],
        )
        .await
    }

    async fn pending_traslados(&self, caja_destino_id: &str) -> Result<Vec<Traslado>> {
        let value = self
            .select(
                "traslados",
                &[
                    ("select", "*".into()),
                    ("caja_destino_id", eq(caja_destino_id)),
                    ("estado", eq("en_transito")),
                    ("order", "fecha_hora_envio.desc".into()),
                ],
            )
            .await?;
        decode("traslados", value)
    }

    async fn receive_traslado(&self, recepcion: &NewRecepcion) -> Result<Recepcion> {
        let value = self
            .rpc(
                "recibir_traslado",
                &json!({
                    "p_traslado_id": recepcion.traslado_id,
                    "p_usuario_receptor_id": recepcion.usuario_receptor_id,
                    "p_monto_recibido": recepcion.monto_recibido,
                    "p_diferencia": recepcion.diferencia,
                    "p_comentario": recepcion.comentario,
                    "p_estado": recepcion.estado_final.as_str(),
                }),
            )
            .await?;
        first_of("recibir_traslado", value)
    }

    async fn recent_aperturas(&self, limit: usize) -> Result<Vec<AperturaHistoryRow>> {
        let value = self
            .select("aperturas", &history_params(SELECT_APERTURA_HISTORY, "fecha_hora", limit))
            .await?;
        parse_apertura_history(value)
    }

    async fn recent_arqueos(&self, limit: usize) -> Result<Vec<ArqueoHistoryRow>> {
        let value = self
            .select("arqueos", &history_params(SELECT_ARQUEO_HISTORY, "fecha_hora", limit))
            .await?;
        parse_arqueo_history(value)
    }

    async fn recent_traslados(&self, limit: usize) -> Result<Vec<TrasladoHistoryRow>> {
        let value = self
            .select(
                "traslados",
                &history_params(SELECT_TRASLADO_HISTORY, "fecha_hora_envio", limit),
            )
            .await?;
        parse_traslado_history(value)
    }

    async fn recent_recepciones(&self, limit: usize) -> Result<Vec<RecepcionHistoryRow>> {
        let value = self
            .select(
                "recepciones",
                &history_params(SELECT_RECEPCION_HISTORY, "fecha_hora", limit),
            )
            .await?;
        parse_recepcion_history(value)
    }
}

fn history_params(select: &str, order_col: &str, limit: usize) -> Vec<(&'static str, String)> {
    vec![
        ("select", select.to_string()),
        ("order", format!("{order_col}.desc")),
        ("limit", limit.to_string()),
    ]
}

// ===========================================================================
// Tests
// ===========================================================================
