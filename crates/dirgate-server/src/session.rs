//! Per-connection LDAP message loop

use crate::codec::GatewayCodec;
use crate::frontend::{ldap_result, BindRequest, Frontend, SearchRequest};
use futures::{SinkExt, StreamExt};
use ldap3_proto::proto::{
    LdapBindResponse, LdapExtendedResponse, LdapMsg, LdapOp, LdapResultCode,
};
use ldap3_proto::simple::DisconnectionNotice;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

/// What to do after a request was handled
enum Flow {
    Reply(Vec<LdapMsg>),
    /// Send the notice (if any), then hang up
    Close(Option<LdapMsg>),
}

/// Serve LDAP requests on `stream` until the client unbinds or disconnects
pub async fn serve_connection<S>(stream: S, frontend: &Frontend)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut requests = FramedRead::new(reader, GatewayCodec::default());
    let mut responses = FramedWrite::new(writer, GatewayCodec::default());

    while let Some(frame) = requests.next().await {
        let flow = match frame {
            Ok(msg) => dispatch(frontend, msg).await,
            Err(e) => {
                warn!(error = ?e, "Undecodable LDAP message");
                Flow::Close(Some(DisconnectionNotice::gen(
                    LdapResultCode::ProtocolError,
                    "Malformed LDAP message",
                )))
            }
        };

        match flow {
            Flow::Reply(messages) => {
                for msg in messages {
                    if let Err(e) = responses.send(msg).await {
                        debug!(error = ?e, "Client went away");
                        return;
                    }
                }
            }
            Flow::Close(notice) => {
                if let Some(notice) = notice {
                    let _ = responses.send(notice).await;
                }
                return;
            }
        }
    }

    debug!("Client disconnected");
}

async fn dispatch(frontend: &Frontend, msg: LdapMsg) -> Flow {
    let msgid = msg.msgid;
    let reply = |op: LdapOp| LdapMsg {
        msgid,
        op,
        ctrl: vec![],
    };

    match msg.op {
        LdapOp::BindRequest(request) => {
            let res = frontend.handle_bind(&BindRequest::from(&request)).await;
            Flow::Reply(vec![reply(LdapOp::BindResponse(LdapBindResponse {
                res,
                saslcreds: None,
            }))])
        }
        LdapOp::SearchRequest(request) => {
            let response = frontend.handle_search(&SearchRequest::from(&request)).await;

            let mut messages: Vec<_> = response
                .entries
                .into_iter()
                .map(|entry| reply(LdapOp::SearchResultEntry(entry)))
                .collect();
            messages.push(reply(LdapOp::SearchResultDone(response.done)));

            Flow::Reply(messages)
        }
        // No response to an unbind (RFC 4511 4.3)
        LdapOp::UnbindRequest => Flow::Close(None),
        LdapOp::AbandonRequest(_) => Flow::Reply(vec![]),
        LdapOp::ExtendedRequest(request) => {
            debug!(name = %request.name, "Refusing extended operation");
            Flow::Reply(vec![reply(LdapOp::ExtendedResponse(LdapExtendedResponse {
                res: ldap_result(LdapResultCode::UnwillingToPerform, "Extended operations are not supported"),
                name: None,
                value: None,
            }))])
        }
        op => {
            warn!(op = ?op, "Unsupported LDAP operation");
            Flow::Close(Some(DisconnectionNotice::gen(
                LdapResultCode::UnwillingToPerform,
                "Unsupported operation",
            )))
        }
    }
}
