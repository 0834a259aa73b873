//! Request envelope rendering.
//!
//! Every operation posts a fixed SOAP 1.1 envelope. Caller-supplied scalar
//! values are escaped; blocks captured from earlier responses (user profile,
//! contract id, pagination cursor) are already serialized XML and are
//! embedded as-is.

use chrono::{Datelike, NaiveDate};

use crate::config::ProtocolConfig;

/// SOAP namespace URIs.
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const WSSE_ACTOR: &str = "http://www.isban.es/soap/actor/wssecurityB64";

/// Service namespaces and SOAP operation names.
pub const LOGIN_NS: &str = "http://www.isban.es/webservices/TECHNICAL_FACADES/Security/F_facseg_security/internet/loginServicesNSegWS/v1";
pub const PRODUCTS_NS: &str = "http://www.isban.es/webservices/BAMOBI/Posglobal/F_bamobi_posicionglobal_lip/internet/BAMOBIPGL/v1";
pub const TRANSACTIONS_NS: &str =
    "http://www.isban.es/webservices/BAMOBI/Cuentas/F_bamobi_cuentas_lip/internet/BAMOBICTA/v1";

pub const LOGIN_OPERATION: &str = "authenticateCredential";
pub const PRODUCTS_OPERATION: &str = "obtenerPosGlobal_LIP";
pub const TRANSACTIONS_OPERATION: &str = "listaMovCuentasFechas_LIP";

/// Document type code sent alongside the user id at login.
const DOCUMENT_TYPE: &str = "N";

/// The envelope shapes the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template<'a> {
    /// `authenticateCredential`
    Login {
        user_id: &'a str,
        password: &'a str,
        public_ip: &'a str,
    },
    /// `obtenerPosGlobal_LIP`
    Products,
    /// `listaMovCuentasFechas_LIP`
    AccountPage {
        /// Serialized children of the captured `datosUsuario` block
        profile_xml: &'a str,
        /// Serialized contract id block of the account
        contract_id_xml: &'a str,
        from: NaiveDate,
        to: NaiveDate,
        /// Serialized `importeCta` element from the previous page
        accumulated_amount_xml: Option<&'a str>,
        /// Serialized `repo` element from the previous page
        continuation_xml: Option<&'a str>,
    },
}

/// Render a template into the envelope string posted to the service.
///
/// `security_token` goes into the WS-Security header of every envelope
/// except login, which is sent with an empty header.
pub fn render(template: &Template<'_>, security_token: &str, protocol: &ProtocolConfig) -> String {
    match *template {
        Template::Login {
            user_id,
            password,
            public_ip,
        } => login_envelope(user_id, password, public_ip),
        Template::Products => products_envelope(security_token, protocol),
        Template::AccountPage {
            profile_xml,
            contract_id_xml,
            from,
            to,
            accumulated_amount_xml,
            continuation_xml,
        } => {
            let is_pagination = if continuation_xml.is_some() { "S" } else { "N" };
            format!(
                r#"<soapenv:Envelope xmlns:soapenv="{env}" xmlns:v1="{ns}">
{header}
  <soapenv:Body>
    <v1:{op} facade="BAMOBICTA">
      <entrada>
{cabecera}
        <datosConexion>{profile}</datosConexion>
        <contratoID>{contract}</contratoID>
        <fechaDesde>{from}</fechaDesde>
        <fechaHasta>{to}</fechaHasta>
        {amount}
        <esUnaPaginacion>{is_pagination}</esUnaPaginacion>
        {repo}
      </entrada>
    </v1:{op}>
  </soapenv:Body>
</soapenv:Envelope>"#,
                env = SOAP_ENV_NS,
                ns = TRANSACTIONS_NS,
                header = security_header(security_token),
                op = TRANSACTIONS_OPERATION,
                cabecera = datos_cabecera(protocol),
                profile = profile_xml,
                contract = contract_id_xml,
                from = date_fields(from),
                to = date_fields(to),
                amount = accumulated_amount_xml.unwrap_or(""),
                is_pagination = is_pagination,
                repo = continuation_xml.unwrap_or(""),
            )
        }
    }
}

fn login_envelope(user_id: &str, password: &str, public_ip: &str) -> String {
    format!(
        r#"<v:Envelope xmlns:v="{env}" xmlns:c="{enc}" xmlns:d="{xsd}" xmlns:i="{xsi}">
  <v:Header />
  <v:Body>
    <n0:{op} xmlns:n0="{ns}" facade="loginServicesNSegWS">
      <CB_AuthenticationData i:type=":CB_AuthenticationData">
        <documento i:type=":documento">
          <CODIGO_DOCUM_PERSONA_CORP i:type="d:string">{user}</CODIGO_DOCUM_PERSONA_CORP>
          <TIPO_DOCUM_PERSONA_CORP i:type="d:string">{doc_type}</TIPO_DOCUM_PERSONA_CORP>
        </documento>
        <password i:type="d:string">{password}</password>
      </CB_AuthenticationData>
      <userAddress i:type="d:string">{ip}</userAddress>
    </n0:{op}>
  </v:Body>
</v:Envelope>"#,
        env = SOAP_ENV_NS,
        enc = SOAP_ENC_NS,
        xsd = XSD_NS,
        xsi = XSI_NS,
        op = LOGIN_OPERATION,
        ns = LOGIN_NS,
        user = xml_escape(user_id),
        doc_type = DOCUMENT_TYPE,
        password = xml_escape(password),
        ip = xml_escape(public_ip),
    )
}

fn products_envelope(security_token: &str, protocol: &ProtocolConfig) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="{env}" xmlns:v1="{ns}">
{header}
  <soapenv:Body>
    <v1:{op} facade="BAMOBIPGL">
      <entrada>
{cabecera}
      </entrada>
    </v1:{op}>
  </soapenv:Body>
</soapenv:Envelope>"#,
        env = SOAP_ENV_NS,
        ns = PRODUCTS_NS,
        header = security_header(security_token),
        op = PRODUCTS_OPERATION,
        cabecera = datos_cabecera(protocol),
    )
}

/// WS-Security header carrying the session token.
fn security_header(token: &str) -> String {
    format!(
        r#"  <soapenv:Header>
    <wsse:Security SOAP-ENV:actor="{actor}" SOAP-ENV:mustUnderstand="1" S12:role="wsssecurity" xmlns:wsse="{wsse}" xmlns:S12="{s12}" xmlns:SOAP-ENV="{env}">
      <wsse:BinarySecurityToken xmlns:wsu="{wsu}" wsu:Id="SSOToken" ValueType="esquema" EncodingType="hwsse:Base64Binary">{token}</wsse:BinarySecurityToken>
    </wsse:Security>
  </soapenv:Header>"#,
        actor = WSSE_ACTOR,
        wsse = WSSE_NS,
        s12 = SOAP_12_NS,
        env = SOAP_ENV_NS,
        wsu = WSU_NS,
        token = xml_escape(token),
    )
}

fn datos_cabecera(protocol: &ProtocolConfig) -> String {
    format!(
        r#"        <datosCabecera>
          <version>{}</version>
          <terminalID>{}</terminalID>
          <idioma>{}</idioma>
        </datosCabecera>"#,
        xml_escape(&protocol.version),
        xml_escape(&protocol.terminal_id),
        xml_escape(&protocol.locale),
    )
}

/// Dates travel as three separate elements, without zero padding.
pub fn date_fields(date: NaiveDate) -> String {
    format!(
        "<dia>{}</dia><mes>{}</mes><anyo>{}</anyo>",
        date.day(),
        date.month(),
        date.year()
    )
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
