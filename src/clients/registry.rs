use crate::model::Protocol;

use super::smtp::SmtpStartTlsHandler;
use super::stub::UnimplementedHandler;
use super::web::WebTlsHandler;
use super::ProtocolHandler;

static WEB_TLS_HANDLER: WebTlsHandler = WebTlsHandler;
static SMTP_HANDLER: SmtpStartTlsHandler = SmtpStartTlsHandler;
static LDAP_HANDLER: UnimplementedHandler = UnimplementedHandler(Protocol::Ldap);
static IMAP_HANDLER: UnimplementedHandler = UnimplementedHandler(Protocol::Imap);
static POP3_HANDLER: UnimplementedHandler = UnimplementedHandler(Protocol::Pop3);
static CUSTOM_HANDLER: UnimplementedHandler = UnimplementedHandler(Protocol::Custom);

pub fn handler_for(protocol: Protocol) -> &'static dyn ProtocolHandler {
    match protocol {
        Protocol::Http1 | Protocol::H2 | Protocol::H3 => &WEB_TLS_HANDLER,
        Protocol::Smtp => &SMTP_HANDLER,
        Protocol::Ldap => &LDAP_HANDLER,
        Protocol::Imap => &IMAP_HANDLER,
        Protocol::Pop3 => &POP3_HANDLER,
        Protocol::Custom => &CUSTOM_HANDLER,
    }
}
