//! Chile Mercado Público: active tenders. The endpoint returns the whole active list,
//! so there is no cursor.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{items_under, ConnectorError, ConnectorSettings, Readiness, SourceConnector};

pub const MERCADO_PUBLICO_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("CodigoExterno")]]),
    title: FieldRule::paths(&[&[PathSeg::Key("Nombre")]]).or_default(UNTITLED_PLACEHOLDER),
    description: FieldRule::paths(&[&[PathSeg::Key("Descripcion")]]),
    buyer: FieldRule::paths(&[&[PathSeg::Key("Comprador"), PathSeg::Key("NombreOrganismo")]]),
    country: FieldRule::NONE.or_default("Chile"),
    publication_date: FieldRule::paths(&[
        &[PathSeg::Key("Fechas"), PathSeg::Key("FechaPublicacion")],
        &[PathSeg::Key("FechaPublicacion")],
    ]),
    deadline: FieldRule::paths(&[&[PathSeg::Key("FechaCierre")], &[PathSeg::Key("Fechas"), PathSeg::Key("FechaCierre")]]),
    raw_url: FieldRule::NONE,
    raw_url_template: Some(
        "https://www.mercadopublico.cl/Procurement/Modules/RFB/DetailsAcquisition.aspx?idlicitacion={source_id}",
    ),
};

const ENDPOINT: &str = "https://api.mercadopublico.cl/servicios/v1/publico/licitaciones.json";
const CREDENTIAL_ENV: &str = "MERCADO_PUBLICO_TICKET";

#[derive(Debug, Clone)]
pub struct MercadoPublicoConnector {
    endpoint: String,
    ticket: Option<String>,
    missing_reason: String,
}

impl MercadoPublicoConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            endpoint: settings.endpoint_or(ENDPOINT),
            ticket: settings.credential().map(str::to_string),
            missing_reason: settings.missing_credential_reason(CREDENTIAL_ENV),
        }
    }
}

impl SourceConnector for MercadoPublicoConnector {
    fn source(&self) -> &str {
        "mercado_publico"
    }

    fn mapping(&self) -> &MappingTable {
        &MERCADO_PUBLICO_MAPPING
    }

    fn readiness(&self) -> Readiness {
        match self.ticket {
            Some(_) => Readiness::Ready,
            None => Readiness::Skip(self.missing_reason.clone()),
        }
    }

    fn supports_cursor(&self) -> bool {
        false
    }

    fn build_request(&self, _cursor: Option<&str>, _now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        let ticket = self
            .ticket
            .as_deref()
            .ok_or_else(|| ConnectorError::ConfigMissing(self.missing_reason.clone()))?;
        Ok(FetchRequest::get(&self.endpoint)
            .with_query("estado", "activas")
            .with_query("ticket", ticket))
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["Listado"])
    }

    fn next_cursor(&self, _page: &FetchedJson, _cursor: Option<&str>, _items_seen: usize) -> Option<String> {
        None
    }
}
