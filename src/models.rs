//! Domain records shared by the stores and controllers.
//!
//! Column names follow the hosted schema (`turnos`, `aperturas`, ...) so the
//! same structs deserialize straight out of PostgREST responses.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter key of the difference-justification threshold.
pub const PARAM_UMBRAL_DIFERENCIA: &str = "umbral_diferencia";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub nombre_completo: String,
    #[serde(default = "default_rol")]
    pub rol: String,
}

fn default_rol() -> String {
    "cajero".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caja {
    pub id: String,
    pub nombre: String,
    #[serde(default)]
    pub ubicacion: Option<String>,
    #[serde(default)]
    pub es_principal: bool,
    #[serde(default = "default_true")]
    pub activa: bool,
}

fn default_true() -> bool {
    true
}

/// Shift state. There is no transition back from `Cerrado`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnoEstado {
    Abierto,
    Cerrado,
}

impl TurnoEstado {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abierto => "abierto",
            Self::Cerrado => "cerrado",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "abierto" => Some(Self::Abierto),
            "cerrado" => Some(Self::Cerrado),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turno {
    pub id: String,
    pub usuario_id: String,
    pub caja_id: String,
    pub fecha: NaiveDate,
    pub hora_inicio: String,
    #[serde(default)]
    pub hora_fin: Option<String>,
    pub estado: TurnoEstado,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Apertura {
    pub id: String,
    pub turno_id: String,
    pub monto_inicial: Decimal,
    pub cerrada: bool,
    pub fecha_hora: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arqueo {
    pub id: String,
    pub apertura_id: String,
    pub monto_contado: Decimal,
    pub monto_esperado: Decimal,
    pub diferencia: Decimal,
    #[serde(default)]
    pub comentario: Option<String>,
    pub fecha_hora: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrasladoEstado {
    EnTransito,
    Recibido,
    Observado,
}

impl TrasladoEstado {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnTransito => "en_transito",
            Self::Recibido => "recibido",
            Self::Observado => "observado",
        }
    }

    /// Unknown values are treated as `Observado`, matching the display rule.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "en_transito" => Self::EnTransito,
            "recibido" => Self::Recibido,
            _ => Self::Observado,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traslado {
    pub id: String,
    pub arqueo_id: String,
    pub caja_origen_id: String,
    pub caja_destino_id: String,
    pub monto: Decimal,
    pub estado: TrasladoEstado,
    pub fecha_hora_envio: DateTime<Utc>,
    #[serde(default)]
    pub comentario: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recepcion {
    pub id: String,
    pub traslado_id: String,
    pub usuario_receptor_id: String,
    pub monto_recibido: Decimal,
    pub diferencia: Decimal,
    #[serde(default)]
    pub comentario: Option<String>,
    pub fecha_hora: DateTime<Utc>,
}

/// An open shift with its register and (if created) its opening.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTurno {
    pub turno: Turno,
    pub caja: Caja,
    pub apertura: Option<Apertura>,
}

/// The user's open, unreconciled opening.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOpening {
    pub turno_id: String,
    pub apertura_id: String,
    pub monto_inicial: Decimal,
    pub caja: Caja,
    pub fecha: NaiveDate,
    pub hora_inicio: String,
}

// ---------------------------------------------------------------------------
// Write requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewShift {
    pub usuario_id: String,
    pub caja_id: String,
    pub monto_inicial: Decimal,
}

/// The three dependent writes that close a shift, applied as one unit.
#[derive(Debug, Clone)]
pub struct ShiftClosure {
    pub apertura_id: String,
    pub turno_id: String,
    pub monto_contado: Decimal,
    pub monto_esperado: Decimal,
    pub diferencia: Decimal,
    pub comentario: Option<String>,
    pub hora_fin: String,
}

#[derive(Debug, Clone)]
pub struct NewTraslado {
    pub arqueo_id: String,
    pub caja_origen_id: String,
    pub caja_destino_id: String,
    pub monto: Decimal,
    pub comentario: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRecepcion {
    pub traslado_id: String,
    pub usuario_receptor_id: String,
    pub monto_recibido: Decimal,
    pub diferencia: Decimal,
    pub comentario: Option<String>,
    pub estado_final: TrasladoEstado,
}

// ---------------------------------------------------------------------------
// History rows (already joined with register / user names)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AperturaHistoryRow {
    pub id: String,
    pub monto_inicial: Decimal,
    pub fecha_hora: DateTime<Utc>,
    pub cerrada: bool,
    pub caja_nombre: String,
    pub usuario_nombre: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArqueoHistoryRow {
    pub id: String,
    pub monto_contado: Decimal,
    pub diferencia: Decimal,
    pub fecha_hora: DateTime<Utc>,
    pub caja_nombre: String,
    pub usuario_nombre: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrasladoHistoryRow {
    pub id: String,
    pub monto: Decimal,
    pub estado: TrasladoEstado,
    pub fecha_hora_envio: DateTime<Utc>,
    pub caja_origen_nombre: String,
    pub caja_destino_nombre: String,
    pub usuario_nombre: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecepcionHistoryRow {
    pub id: String,
    pub monto_recibido: Decimal,
    pub diferencia: Decimal,
    pub fecha_hora: DateTime<Utc>,
    pub caja_destino_nombre: String,
    pub usuario_nombre: String,
}

// ---------------------------------------------------------------------------
// Normalized operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Apertura,
    Arqueo,
    Traslado,
    Recepcion,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Apertura,
        OperationKind::Arqueo,
        OperationKind::Traslado,
        OperationKind::Recepcion,
    ];

    /// Display label used by the history table.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Apertura => "Apertura",
            Self::Arqueo => "Arqueo",
            Self::Traslado => "Traslado",
            Self::Recepcion => "Recepción",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Common display shape for every operation kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOperation {
    pub id: String,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub difference: Option<Decimal>,
    pub status: String,
    pub register: String,
    pub user: String,
}
