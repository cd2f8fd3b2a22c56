//! WebSocket transport for the real-time fabric.
//!
//! There is one endpoint per namespace: `/ws/customer`, `/ws/partner` and `/ws/operations`. The access token is
//! checked before the upgrade, either from the `Authorization` header or from a `token` query parameter for clients
//! that cannot set headers on an upgrade. Once connected, clients send JSON commands tagged with `command`, such as
//! `{"command": "join_order", "order_id": 7}`, and receive a reply tagged with `reply` for each one. Events arrive as
//! `{"event", "room", "data"}` frames.
use std::sync::Arc;

use actix_web::{http::header::AUTHORIZATION, web, HttpRequest, HttpResponse};
use actix_ws::{CloseReason, Message, MessageStream, Session};
use delivery_engine::{
    realtime::{ClientCommand, ConnectionId, EventFabric, FabricMessage, Namespace},
    OrderManagement,
    PresenceManagement,
};
use futures::StreamExt;
use log::*;
use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    auth::{bearer_token, TokenVerifier},
    data_objects::SocketParams,
    errors::{AuthError, ServerError},
    route,
};

route!(customer_socket => Get "/ws/customer" impl OrderManagement, PresenceManagement);
pub async fn customer_socket<B: OrderManagement + PresenceManagement + 'static>(
    req: HttpRequest,
    body: web::Payload,
    params: web::Query<SocketParams>,
    verifier: web::Data<TokenVerifier>,
    fabric: web::Data<EventFabric<B>>,
) -> Result<HttpResponse, ServerError> {
    open_socket(Namespace::Customer, req, body, params.into_inner(), &verifier, fabric.into_inner()).await
}

route!(partner_socket => Get "/ws/partner" impl OrderManagement, PresenceManagement);
pub async fn partner_socket<B: OrderManagement + PresenceManagement + 'static>(
    req: HttpRequest,
    body: web::Payload,
    params: web::Query<SocketParams>,
    verifier: web::Data<TokenVerifier>,
    fabric: web::Data<EventFabric<B>>,
) -> Result<HttpResponse, ServerError> {
    open_socket(Namespace::Partner, req, body, params.into_inner(), &verifier, fabric.into_inner()).await
}

route!(operations_socket => Get "/ws/operations" impl OrderManagement, PresenceManagement);
pub async fn operations_socket<B: OrderManagement + PresenceManagement + 'static>(
    req: HttpRequest,
    body: web::Payload,
    params: web::Query<SocketParams>,
    verifier: web::Data<TokenVerifier>,
    fabric: web::Data<EventFabric<B>>,
) -> Result<HttpResponse, ServerError> {
    open_socket(Namespace::Operations, req, body, params.into_inner(), &verifier, fabric.into_inner()).await
}

/// The header wins over the query parameter when both are present.
fn socket_token(req: &HttpRequest, params: SocketParams) -> Result<String, AuthError> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(String::from)
        .or(params.token)
        .ok_or(AuthError::MissingToken)
}

async fn open_socket<B>(
    namespace: Namespace,
    req: HttpRequest,
    body: web::Payload,
    params: SocketParams,
    verifier: &TokenVerifier,
    fabric: Arc<EventFabric<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + PresenceManagement + 'static,
{
    let token = socket_token(&req, params)?;
    let actor = verifier.verify(&token)?.actor()?;
    let (connection, events) = fabric.connect(actor, namespace)?;
    let (response, session, stream) = match actix_ws::handle(&req, body) {
        Ok(parts) => parts,
        Err(e) => {
            fabric.disconnect(connection).await?;
            return Err(ServerError::InvalidRequestBody(format!("WebSocket upgrade failed. {e}")));
        },
    };
    info!("💻️ {actor} connected to /ws/{namespace} as connection #{connection}");
    actix_web::rt::spawn(run_session(fabric, connection, session, stream, events));
    Ok(response)
}

async fn run_session<B>(
    fabric: Arc<EventFabric<B>>,
    connection: ConnectionId,
    mut session: Session,
    mut stream: MessageStream,
    mut events: mpsc::Receiver<FabricMessage>,
) where
    B: OrderManagement + PresenceManagement + 'static,
{
    let reason: Option<CloseReason> = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(message) => {
                    let frame = match serde_json::to_string(&message) {
                        Ok(s) => s,
                        Err(e) => {
                            error!("💻️ Could not serialize {} event for connection #{connection}. {e}", message.event);
                            continue;
                        },
                    };
                    if session.text(frame).await.is_err() {
                        break None;
                    }
                },
                None => break None,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = command_reply(&fabric, connection, &text).await;
                    if session.text(reply).await.is_err() {
                        break None;
                    }
                },
                Some(Ok(Message::Ping(bytes))) => {
                    if session.pong(&bytes).await.is_err() {
                        break None;
                    }
                },
                Some(Ok(Message::Close(reason))) => break reason,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!("💻️ Protocol error on connection #{connection}. {e}");
                    break None;
                },
                None => break None,
            },
        }
    };
    let _ = session.close(reason).await;
    if let Err(e) = fabric.disconnect(connection).await {
        warn!("💻️ Could not clean up after connection #{connection}. {e}");
    }
}

async fn command_reply<B>(fabric: &EventFabric<B>, connection: ConnectionId, text: &str) -> String
where B: OrderManagement + PresenceManagement {
    let result = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => {
            trace!("💻️ Connection #{connection} sent {command:?}");
            fabric.handle_command(connection, command).await.map_err(ServerError::from)
        },
        Err(e) => Err(ServerError::InvalidRequestBody(format!("Unrecognised command. {e}"))),
    };
    match result.map(|reply| serde_json::to_string(&reply)) {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => error_frame(&ServerError::Unspecified(e.to_string())),
        Err(e) => error_frame(&e),
    }
}

fn error_frame(err: &ServerError) -> String {
    json!({ "reply": "error", "code": err.code(), "error": err.client_message() }).to_string()
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn header_tokens_win_over_the_query() {
        let req = TestRequest::default().insert_header((AUTHORIZATION, "Bearer from-header")).to_http_request();
        let token = socket_token(&req, SocketParams { token: Some("from-query".into()) }).unwrap();
        assert_eq!(token, "from-header");

        let req = TestRequest::default().to_http_request();
        let token = socket_token(&req, SocketParams { token: Some("from-query".into()) }).unwrap();
        assert_eq!(token, "from-query");

        assert!(matches!(socket_token(&req, SocketParams::default()), Err(AuthError::MissingToken)));
    }

    #[test]
    fn errors_are_tagged_replies() {
        let frame = error_frame(&ServerError::InvalidRequestBody("nope".into()));
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["reply"], "error");
        assert_eq!(value["code"], "VALIDATION_ERROR");
    }
}
