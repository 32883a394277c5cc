//! Typed store boundary.
//!
//! Controllers talk to the data store only through [`CajaStore`]. Each method
//! is an explicit query returning domain records, so the relational shape of
//! the backend (SQL joins locally, embedded selects on PostgREST) never leaks
//! into the controllers. Methods that perform several writes are atomic:
//! either every write lands or none does.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Apertura, AperturaHistoryRow, Arqueo, ArqueoHistoryRow, Caja, NewRecepcion, NewShift,
    NewTraslado, OpenTurno, Profile, Recepcion, RecepcionHistoryRow, ShiftClosure, Traslado,
    TrasladoHistoryRow, Turno,
};

/// A profile together with its stored password hash (auth only).
#[derive(Debug, Clone)]
pub struct ProfileCredentials {
    pub profile: Profile,
    pub password_hash: String,
}

/// A user verified by an external auth service.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub profile: Profile,
    /// When the service's access token stops being accepted.
    pub access_expires_at: Option<DateTime<Utc>>,
}

#[allow(async_fn_in_trait)]
pub trait CajaStore {
    // -- External auth ----------------------------------------------------------

    /// Verify a password against the store's own auth service. `None` means
    /// the store has none and credentials are checked locally.
    async fn password_sign_in(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Option<AuthenticatedUser>> {
        Ok(None)
    }

    /// Register with the store's own auth service. `None` means the store
    /// has none and the profile is inserted locally.
    async fn password_sign_up(
        &self,
        _email: &str,
        _password: &str,
        _nombre_completo: &str,
    ) -> Result<Option<Profile>> {
        Ok(None)
    }

    /// Drop any credentials the store holds for the signed-in user.
    async fn end_session(&self) {}

    // -- Parameters / reference data ------------------------------------------

    async fn get_parametro(&self, clave: &str) -> Result<Option<String>>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    async fn find_credentials_by_email(&self, email: &str) -> Result<Option<ProfileCredentials>>;

    async fn insert_profile(&self, profile: &Profile, password_hash: &str) -> Result<()>;

    async fn get_caja(&self, caja_id: &str) -> Result<Option<Caja>>;

    async fn list_cajas(&self) -> Result<Vec<Caja>>;

    // -- Shift lifecycle ------------------------------------------------------

    /// Open shifts of `user_id`, most recently created first.
    async fn open_turnos_for_user(&self, user_id: &str) -> Result<Vec<OpenTurno>>;

    /// Create a shift and its opening as one unit.
    async fn open_shift(&self, shift: &NewShift) -> Result<(Turno, Apertura)>;

    /// Insert the reconciliation, close the opening and close the shift as
    /// one unit.
    async fn close_shift(&self, closure: &ShiftClosure) -> Result<Arqueo>;

    // -- Transfers ------------------------------------------------------------

    async fn get_arqueo(&self, arqueo_id: &str) -> Result<Option<Arqueo>>;

    /// Register of the shift the reconciliation closed.
    async fn caja_of_arqueo(&self, arqueo_id: &str) -> Result<Option<String>>;

    async fn traslado_for_arqueo(&self, arqueo_id: &str) -> Result<Option<Traslado>>;

    async fn insert_traslado(&self, traslado: &NewTraslado) -> Result<Traslado>;

    async fn get_traslado(&self, traslado_id: &str) -> Result<Option<Traslado>>;

    /// Transfers still in transit towards `caja_destino_id`.
    async fn pending_traslados(&self, caja_destino_id: &str) -> Result<Vec<Traslado>>;

    /// Insert the reception and settle the transfer status as one unit.
    async fn receive_traslado(&self, recepcion: &NewRecepcion) -> Result<Recepcion>;

    // -- History sources (most recent first) ----------------------------------

    async fn recent_aperturas(&self, limit: usize) -> Result<Vec<AperturaHistoryRow>>;

    async fn recent_arqueos(&self, limit: usize) -> Result<Vec<ArqueoHistoryRow>>;

    async fn recent_traslados(&self, limit: usize) -> Result<Vec<TrasladoHistoryRow>>;

    async fn recent_recepciones(&self, limit: usize) -> Result<Vec<RecepcionHistoryRow>>;
}
