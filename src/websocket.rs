/// WebSocket session socket: one client id per connection
use actix::prelude::*;
use actix_web_actors::ws;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::messages::{Request, Response};
use crate::session::Session;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connection actor. Requests are handled one at a time in
/// arrival order: each one blocks the actor's mailbox until it completes.
pub struct SessionSocket {
    hb: Instant,
    session: Arc<Session>,
    client: Option<String>,
}

impl SessionSocket {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            hb: Instant::now(),
            session,
            client: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket client {:?} heartbeat failed, disconnecting", act.client);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, response: &Response) {
        match serde_json::to_string(response) {
            Ok(text) => ctx.text(text),
            Err(e) => error!("Failed to serialize response: {}", e),
        }
    }

    fn handle_payload(&mut self, payload: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let request = match serde_json::from_slice::<Request>(payload) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::Error {
                    kind: "InvalidRequest".to_string(),
                    message: format!("Invalid message format: {}", e),
                    span: None,
                };
                Self::send(ctx, &response);
                return;
            }
        };

        let Some(client) = self.client.clone() else {
            ctx.stop();
            return;
        };

        if request == Request::Init {
            Self::send(ctx, &Response::Init { client_id: client });
            return;
        }

        let session = self.session.clone();
        ctx.wait(
            async move { session.handle_request(&client, request).await }
                .into_actor(self)
                .map(|response, _act, ctx| Self::send(ctx, &response)),
        );
    }
}

impl Actor for SessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        let session = self.session.clone();
        ctx.wait(
            async move { session.init().await }
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(client) => {
                        debug!("WebSocket bound to client '{}'", client);
                        act.client = Some(client);
                    }
                    Err(e) => {
                        error!("Failed to start session: {}", e);
                        ctx.stop();
                    }
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(client) = self.client.take() {
            let session = self.session.clone();
            actix::spawn(async move { session.close_client(&client).await });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => self.handle_payload(text.as_bytes(), ctx),
            Ok(ws::Message::Binary(bytes)) => self.handle_payload(&bytes, ctx),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => ctx.stop(),
        }
    }
}
