//! Script-visible `peer` and `server` objects

use crate::client::ConnectionId;
use crate::peer::Peer;
use crate::server::ServerControl;
use async_trait::async_trait;
use pyro_core::{Exec, Object, PyroError, Result, Value};
use std::sync::Arc;

fn id_value(id: ConnectionId) -> Value {
    Value::Int(id.0 as i64)
}

fn id_arg(method: &str, value: &Value) -> Result<ConnectionId> {
    value
        .as_int()
        .and_then(|i| u64::try_from(i).ok())
        .map(ConnectionId)
        .ok_or_else(|| {
            PyroError::TypeError(format!(
                "{} expects a connection id, got {}",
                method,
                value.type_name()
            ))
        })
}

fn arity(method: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(PyroError::Arity {
            name: method.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn unknown(object: &str, method: &str) -> PyroError {
    PyroError::UnknownMember {
        object: object.to_string(),
        member: method.to_string(),
    }
}

/// `peer`: connect to remotes and send them scripts
pub struct PeerObject {
    peer: Arc<Peer>,
}

impl PeerObject {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl Object for PeerObject {
    fn type_name(&self) -> &'static str {
        "peer"
    }

    fn describe(&self) -> String {
        format!("peer ({} clients)", self.peer.clients().len())
    }

    fn get(&self, member: &str) -> Option<Value> {
        match member {
            "Entered" => Some(self.peer.entered().map_or(Value::Bool(false), id_value)),
            _ => None,
        }
    }

    async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        _exec: &mut Exec,
    ) -> Result<Option<Value>> {
        match method {
            "Connect" => {
                arity(method, &args, 2)?;
                let (Value::Str(host), Some(port)) = (&args[0], args[1].as_int()) else {
                    return Err(PyroError::TypeError(
                        "Connect expects (host: string, port: int)".into(),
                    ));
                };
                let port = u16::try_from(port)
                    .map_err(|_| PyroError::TypeError(format!("Invalid port: {}", port)))?;
                let id = self.peer.connect(host, port).await?;
                Ok(Some(id_value(id)))
            }
            "Enter" => {
                let target = match args.as_slice() {
                    [] => None,
                    [id] => Some(id_arg(method, id)?),
                    _ => {
                        return Err(PyroError::Arity {
                            name: method.to_string(),
                            expected: 1,
                            got: args.len(),
                        });
                    }
                };
                let id = self.peer.enter(target)?;
                Ok(Some(id_value(id)))
            }
            "Leave" => {
                arity(method, &args, 0)?;
                Ok(Some(Value::Bool(self.peer.leave().is_some())))
            }
            "Execute" => {
                arity(method, &args, 1)?;
                match &args[0] {
                    Value::Str(text) => self.peer.execute(text).await?,
                    Value::Closure(closure) => self.peer.continue_(&closure.body).await?,
                    other => {
                        return Err(PyroError::TypeError(format!(
                            "Execute expects a script or continuation, got {}",
                            other.type_name()
                        )));
                    }
                }
                Ok(None)
            }
            "Request" => {
                let (id, text) = match args.as_slice() {
                    [Value::Str(text)] => (None, text),
                    [id, Value::Str(text)] => (Some(id_arg(method, id)?), text),
                    _ => {
                        return Err(PyroError::TypeError(
                            "Request expects ([id,] script: string)".into(),
                        ));
                    }
                };
                let id = match id {
                    Some(id) => id,
                    None => self
                        .peer
                        .entered()
                        .ok_or_else(|| PyroError::NotConnected("no remote entered".into()))?,
                };
                let response = self.peer.request(id, text).await?;
                Ok(Some(Value::Str(response)))
            }
            "Clients" => {
                arity(method, &args, 0)?;
                let ids = self
                    .peer
                    .clients()
                    .iter()
                    .map(|client| id_value(client.id()))
                    .collect();
                Ok(Some(Value::List(ids)))
            }
            _ => Err(unknown("peer", method)),
        }
    }
}

/// `server`: inspect and stop the local server
pub struct ServerObject {
    control: Arc<ServerControl>,
}

impl ServerObject {
    pub(crate) fn new(control: Arc<ServerControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl Object for ServerObject {
    fn type_name(&self) -> &'static str {
        "server"
    }

    async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        _exec: &mut Exec,
    ) -> Result<Option<Value>> {
        match method {
            "Port" => {
                arity(method, &args, 0)?;
                let addr = self
                    .control
                    .local_addr()
                    .ok_or_else(|| PyroError::NotConnected("server not started".into()))?;
                Ok(Some(Value::Int(i64::from(addr.port()))))
            }
            "Stop" => {
                arity(method, &args, 0)?;
                self.control.stop();
                Ok(None)
            }
            _ => Err(unknown("server", method)),
        }
    }
}
