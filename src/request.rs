//! Request composition from session state and caller parameters.

use chrono::{Months, NaiveDate};
use std::fmt;

use crate::config::ProtocolConfig;
use crate::document::Document;
use crate::envelope::{render, Template};
use crate::error::{BankError, BankResult};
use crate::session::SessionState;

/// Response paths read by the pagination loop.
pub const CONTINUATION_PATH: &str = "//methodResult/repo";
pub const ACCUMULATED_AMOUNT_PATH: &str = "//methodResult/importeCta";
pub const END_OF_LIST_PATH: &str = "//methodResult/finLista";

/// End-of-list value meaning more pages remain.
pub const MORE_PAGES_MARKER: &str = "N";

/// Login credentials.
#[derive(Clone)]
pub struct Credentials {
    user_id: String,
    password: String,
}

impl Credentials {
    /// The user id is upper-cased; the password is kept as given.
    pub fn new(user_id: &str, password: impl Into<String>) -> Self {
        Self {
            user_id: normalize_user_id(user_id),
            password: password.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Canonical form of a user id (national id documents are upper case).
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_uppercase()
}

/// Inclusive date range for a transaction query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> BankResult<Self> {
        if from > to {
            return Err(BankError::InvalidDateRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// One calendar month before `today` through `today`.
    pub fn last_month(today: NaiveDate) -> Self {
        let from = today.checked_sub_months(Months::new(1)).unwrap_or(today);
        Self { from, to: today }
    }

    /// Fill in missing bounds: `to` defaults to `today`, `from` to one month
    /// before `today`.
    pub fn with_defaults(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        today: NaiveDate,
    ) -> BankResult<Self> {
        let default = Self::last_month(today);
        Self::new(from.unwrap_or(default.from), to.unwrap_or(default.to))
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }
}

/// Position in a multi-page transaction listing.
///
/// The continuation token and accumulated amount are echoed back verbatim,
/// as serialized elements, in the request for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationCursor {
    continuation_token: Option<String>,
    accumulated_amount: Option<String>,
    is_last_page: bool,
}

impl PaginationCursor {
    /// Cursor for the first request: nothing to echo back.
    pub fn first_page() -> Self {
        Self::default()
    }

    /// Cursor for the page after `document`.
    pub fn from_page(document: &Document) -> BankResult<Self> {
        let continuation_token = document
            .node_at(CONTINUATION_PATH)
            .map(|node| node.outer_xml())
            .transpose()?;
        let accumulated_amount = document
            .node_at(ACCUMULATED_AMOUNT_PATH)
            .map(|node| node.outer_xml())
            .transpose()?;
        let is_last_page = document.value_at(END_OF_LIST_PATH, "") != MORE_PAGES_MARKER;

        Ok(Self {
            continuation_token,
            accumulated_amount,
            is_last_page,
        })
    }

    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    pub fn accumulated_amount(&self) -> Option<&str> {
        self.accumulated_amount.as_deref()
    }

    /// Whether the request built from this cursor continues a listing.
    pub fn is_continuation(&self) -> bool {
        self.continuation_token.is_some()
    }

    pub fn is_last_page(&self) -> bool {
        self.is_last_page
    }
}

/// Builds operation envelopes from a session snapshot.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    protocol: ProtocolConfig,
}

impl RequestBuilder {
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self { protocol }
    }

    /// `authenticateCredential` envelope.
    pub fn login(&self, credentials: &Credentials, public_ip: &str) -> String {
        render(
            &Template::Login {
                user_id: &credentials.user_id,
                password: &credentials.password,
                public_ip,
            },
            "",
            &self.protocol,
        )
    }

    /// `obtenerPosGlobal_LIP` envelope.
    pub fn accounts(&self, session: &SessionState) -> BankResult<String> {
        let token = require_token(session)?;
        Ok(render(&Template::Products, token, &self.protocol))
    }

    /// `listaMovCuentasFechas_LIP` envelope for the page `cursor` points at.
    pub fn transaction_page(
        &self,
        session: &SessionState,
        contract_id: &str,
        range: DateRange,
        cursor: &PaginationCursor,
    ) -> BankResult<String> {
        let token = require_token(session)?;
        let profile_xml = match session.user_profile() {
            Some(profile) => profile.inner_xml()?,
            None => String::new(),
        };

        Ok(render(
            &Template::AccountPage {
                profile_xml: &profile_xml,
                contract_id_xml: contract_id,
                from: range.from,
                to: range.to,
                accumulated_amount_xml: cursor.accumulated_amount(),
                continuation_xml: cursor.continuation_token(),
            },
            token,
            &self.protocol,
        ))
    }
}

fn require_token(session: &SessionState) -> BankResult<&str> {
    match session.token_credential() {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(BankError::PreconditionViolation(
            "no security token in session, login first".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn session() -> SessionState {
        SessionState::initial().update(
            &Document::parse(
                br#"<r><methodResult>
                      <tokenCredential>TOK1</tokenCredential>
                      <datosUsuario><nombre>ANA</nombre><alias>a&amp;b</alias></datosUsuario>
                    </methodResult></r>"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_normalize_user_id() {
        assert_eq!(normalize_user_id("12345678z"), "12345678Z");
        assert_eq!(normalize_user_id(" x1234567l "), "X1234567L");
        assert_eq!(Credentials::new("abc", "Secret").user_id(), "ABC");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("abc", "hunter2");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("ABC"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_login_request() {
        let xml = RequestBuilder::default().login(&Credentials::new("abc", "PwD"), "1.2.3.4");
        let doc = Document::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.value_at("//CODIGO_DOCUM_PERSONA_CORP", ""), "ABC");
        assert_eq!(doc.value_at("//password", ""), "PwD");
        assert_eq!(doc.value_at("//userAddress", ""), "1.2.3.4");
    }

    #[test]
    fn test_accounts_requires_token() {
        let err = RequestBuilder::default()
            .accounts(&SessionState::initial())
            .unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_VIOLATION");

        let xml = RequestBuilder::default().accounts(&session()).unwrap();
        assert!(xml.contains(">TOK1</wsse:BinarySecurityToken>"));
    }

    #[test]
    fn test_transaction_page_requires_token() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let err = RequestBuilder::default()
            .transaction_page(
                &SessionState::initial(),
                "C1",
                range,
                &PaginationCursor::first_page(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_VIOLATION");
    }

    #[test]
    fn test_transaction_page_echoes_profile() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let xml = RequestBuilder::default()
            .transaction_page(&session(), "C1", range, &PaginationCursor::first_page())
            .unwrap();
        assert!(xml.contains(
            "<datosConexion><nombre>ANA</nombre><alias>a&amp;b</alias></datosConexion>"
        ));
        let doc = Document::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.value_at("//esUnaPaginacion", ""), "N");
        assert_eq!(doc.value_at("//contratoID", ""), "C1");
        assert_eq!(doc.value_at("//fechaHasta/dia", ""), "31");
    }

    #[test]
    fn test_cursor_from_page() {
        let page = Document::parse(
            br#"<r><methodResult>
                  <repo><clave>K2</clave></repo>
                  <importeCta><IMPORTE>1.000</IMPORTE></importeCta>
                  <finLista>N</finLista>
                </methodResult></r>"#,
        )
        .unwrap();
        let cursor = PaginationCursor::from_page(&page).unwrap();
        assert!(cursor.is_continuation());
        assert!(!cursor.is_last_page());
        assert_eq!(
            cursor.continuation_token(),
            Some("<repo><clave>K2</clave></repo>")
        );
        assert_eq!(
            cursor.accumulated_amount(),
            Some("<importeCta><IMPORTE>1.000</IMPORTE></importeCta>")
        );

        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let xml = RequestBuilder::default()
            .transaction_page(&session(), "C1", range, &cursor)
            .unwrap();
        let doc = Document::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.value_at("//esUnaPaginacion", ""), "S");
        assert_eq!(doc.value_at("//entrada/repo/clave", ""), "K2");
    }

    #[test]
    fn test_end_of_list_marker() {
        for (xml, last) in [
            ("<r><methodResult><finLista>N</finLista></methodResult></r>", false),
            ("<r><methodResult><finLista>S</finLista></methodResult></r>", true),
            ("<r><methodResult><finLista>Y</finLista></methodResult></r>", true),
            ("<r><methodResult/></r>", true),
        ] {
            let cursor = PaginationCursor::from_page(&Document::parse(xml.as_bytes()).unwrap())
                .unwrap();
            assert_eq!(cursor.is_last_page(), last, "{}", xml);
        }
    }

    #[test]
    fn test_pagination_flag_follows_token_not_marker() {
        let page = Document::parse(
            b"<r><methodResult><finLista>N</finLista></methodResult></r>",
        )
        .unwrap();
        let cursor = PaginationCursor::from_page(&page).unwrap();
        assert!(!cursor.is_last_page());
        assert!(!cursor.is_continuation());
    }

    #[test]
    fn test_date_range() {
        assert!(DateRange::new(date(2024, 2, 1), date(2024, 2, 1)).is_ok());
        let err = DateRange::new(date(2024, 2, 2), date(2024, 2, 1)).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATE_RANGE");
    }

    #[test]
    fn test_last_month() {
        let range = DateRange::last_month(date(2024, 3, 31));
        assert_eq!(range.from(), date(2024, 2, 29));
        assert_eq!(range.to(), date(2024, 3, 31));

        let range = DateRange::last_month(date(2024, 1, 10));
        assert_eq!(range.from(), date(2023, 12, 10));
    }

    #[test]
    fn test_with_defaults() {
        let today = date(2024, 5, 20);
        let range = DateRange::with_defaults(None, None, today).unwrap();
        assert_eq!(range, DateRange::last_month(today));

        let range = DateRange::with_defaults(Some(date(2024, 1, 1)), None, today).unwrap();
        assert_eq!(range.from(), date(2024, 1, 1));
        assert_eq!(range.to(), today);

        assert!(DateRange::with_defaults(Some(date(2024, 6, 1)), None, today).is_err());
    }
}
