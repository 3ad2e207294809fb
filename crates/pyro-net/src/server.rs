//! Listening server executing received scripts
//!
//! Every accepted connection gets its own [`Exec`] over a child of the
//! server's global scope, so stacks and bindings never cross connections.
//! The global scope holds the builtins, `peer`, `server`, and the
//! `connect` / `enter` / `join` / `leave` shorthands.

use crate::client::{ConnectionId, Direction};
use crate::config::{ServerConfig, StackPolicy};
use crate::events::{Listeners, RequestEvent};
use crate::objects::{PeerObject, ServerObject};
use crate::peer::Peer;
use crate::tcp::{TcpReadWrapper, TcpWriteWrapper};
use crate::transport::{AsyncReader, AsyncWriter, preview};
use crate::types::register_types;
use pyro_core::{
    Closure, Context, Exec, Language, PyroError, Registry, Result, Scope, Value, builtins,
    error_marker,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Stop flag and bound address, shared with the `server` script object
pub(crate) struct ServerControl {
    stopping: AtomicBool,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ServerControl {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            stopping: AtomicBool::new(false),
            shutdown,
            local_addr: Mutex::new(None),
        }
    }

    pub(crate) fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Stopping server");
        }
        self.shutdown.send_replace(true);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_local_addr(&self, addr: SocketAddr) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }
}

/// Pyro server
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    context: Context,
    peer: Arc<Peer>,
    globals: Scope,
    control: Arc<ServerControl>,
    received_request: Listeners<RequestEvent>,
}

impl Server {
    /// Create a server whose registry holds the built-in wire types
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let mut registry = Registry::new();
        register_types(&mut registry);
        Self::with_registry(config, registry)
    }

    /// Create a server around a caller-built registry
    pub fn with_registry(config: ServerConfig, registry: Registry) -> Result<Arc<Self>> {
        let registry = Arc::new(registry);
        let peer = Peer::new(registry.clone(), &config);
        let control = Arc::new(ServerControl::new());
        let mut context = Context::with_language(registry.clone(), Language::Rho);

        let globals = Scope::new();
        builtins::install(&globals);
        globals.set("peer", Value::Object(Arc::new(PeerObject::new(peer.clone()))));
        globals.set(
            "server",
            Value::Object(Arc::new(ServerObject::new(control.clone()))),
        );
        bootstrap(&context, &globals, &config)?;
        context.set_language(config.language);

        Ok(Arc::new(Self {
            config,
            registry,
            context,
            peer,
            globals,
            control,
            received_request: Listeners::new(),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Scope every connection scope chains to
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    /// Raised after each reply, whether or not the script succeeded
    pub fn on_received_request(&self) -> &Listeners<RequestEvent> {
        &self.received_request
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.control.local_addr()
    }

    pub fn is_stopping(&self) -> bool {
        self.control.is_stopping()
    }

    /// Fresh Exec over its own child of the global scope
    pub fn new_exec(&self) -> Exec {
        Exec::new(self.registry.clone(), self.globals.child())
    }

    /// Bind, listen and spawn the accept loop
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let addr = lookup_host((host, port))
            .await
            .map_err(|e| PyroError::BindError(format!("Failed to resolve {}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| PyroError::BindError(format!("No address for {}:{}", host, port)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| PyroError::BindError(format!("Failed to create socket: {}", e)))?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| PyroError::BindError(format!("Failed to set SO_REUSEADDR: {}", e)))?;
        socket
            .bind(addr)
            .map_err(|e| PyroError::BindError(format!("Failed to bind {}: {}", addr, e)))?;
        let listener = socket
            .listen(self.config.backlog)
            .map_err(|e| PyroError::BindError(format!("Failed to listen on {}: {}", addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| PyroError::BindError(format!("Failed to read local address: {}", e)))?;

        self.control.set_local_addr(local);
        info!("Pyro server listening on {} ({})", local, self.context.language());

        let shutdown = self.control.shutdown.subscribe();
        tokio::spawn(self.clone().accept_loop(listener, shutdown));
        Ok(local)
    }

    /// Stop accepting; live connections keep being served
    pub fn stop(&self) {
        self.control.stop();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        while !self.control.is_stopping() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if self.control.is_stopping() {
                            debug!("Dropping connection from {} during shutdown", addr);
                            break;
                        }
                        tokio::spawn(self.clone().serve(stream, addr));
                    }
                    Err(e) => {
                        if self.control.is_stopping() {
                            break;
                        }
                        warn!("Accept failed: {}", e);
                    }
                },
            }
        }
        info!("Stopped accepting connections");
    }

    async fn serve(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let (read_half, write_half) = stream.into_split();
        let mut reader = TcpReadWrapper(read_half);
        let mut writer = TcpWriteWrapper(write_half);
        let (id, mut closed) = self.peer.new_connection(addr, Direction::Inbound, None);
        let mut exec = self.new_exec();

        loop {
            let data = tokio::select! {
                _ = closed.changed() => break,
                read = reader.read_message() => match read {
                    Ok(data) => data,
                    Err(e) => {
                        debug!("Client {} stopped sending: {}", id, e);
                        break;
                    }
                },
            };

            let text = match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Client {} sent invalid UTF-8", id);
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            if let Err(e) = self.process_received(id, &mut exec, &mut writer, &text).await {
                warn!("Reply to {} failed: {}", id, e);
                break;
            }
        }

        self.peer.remove(id);
    }

    /// Translate, execute, reply, then raise `received_request`
    ///
    /// Translation and execution failures end up on the stack as error
    /// markers; only a failed reply is returned.
    pub async fn process_received(
        &self,
        client: ConnectionId,
        exec: &mut Exec,
        writer: &mut dyn AsyncWriter,
        text: &str,
    ) -> Result<()> {
        debug!("[{}→Pyro] len={} text={}", client, text.len(), preview(text.as_bytes()));
        self.peer.record_received(client, text);

        let response = self.evaluate(client, exec, text).await;

        debug!("[Pyro→{}] len={} text={}", client, response.len(), preview(response.as_bytes()));
        let sent = writer.write_message(response.as_bytes()).await;
        if sent.is_ok() {
            self.peer.record_sent(client, &response);
        }

        self.received_request.emit(&RequestEvent {
            client,
            text: text.to_string(),
        });
        sent
    }

    /// Run one script and encode the resulting stack
    pub async fn evaluate(&self, client: ConnectionId, exec: &mut Exec, text: &str) -> String {
        match self.context.translate(text, exec.scope()) {
            Ok(continuation) => {
                let continuation = continuation.unwrap_single();
                if let Err(e) = exec.run(&continuation).await {
                    warn!("[{}] Execution failed: {}", client, e);
                }
            }
            Err(e) => {
                warn!("[{}] Translation failed: {}", client, e);
                exec.push(error_marker(&e));
            }
        }

        let response = self.registry.to_script(exec.data_stack());
        if self.config.stack_policy == StackPolicy::ConsumeOnReply {
            exec.clear();
        }
        response
    }
}

/// Bind the shorthand commands, translated once as Rho
fn bootstrap(context: &Context, globals: &Scope, config: &ServerConfig) -> Result<()> {
    let host = context
        .registry()
        .encode(&Value::from(config.bootstrap.connect_host.as_str()));
    let shorthands = [
        (
            "connect",
            format!("peer.Connect({}, {})", host, config.bootstrap.connect_port),
        ),
        ("enter", "peer.Enter()".to_string()),
        ("join", "assert(connect() && enter())".to_string()),
        ("leave", "peer.Leave()".to_string()),
    ];
    for (name, source) in shorthands {
        let body = context.translate_as(Language::Rho, &source, globals)?;
        globals.set(name, Value::Closure(Closure::new(vec![], body)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::{read_frame, write_frame};
    use std::time::Duration;

    struct TestClient(TcpStream);

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self(TcpStream::connect(addr).await.unwrap())
        }

        async fn send(&mut self, text: &str) -> String {
            write_frame(&mut self.0, text.as_bytes()).await.unwrap();
            let reply = read_frame(&mut self.0).await.unwrap();
            String::from_utf8(reply).unwrap()
        }
    }

    async fn started(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
        let server = Server::new(config).unwrap();
        let addr = server.start().await.unwrap();
        (server, addr)
    }

    #[tokio::test]
    async fn test_back_to_back_scripts_accumulate() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(client.send("1").await, "1");
        assert_eq!(client.send("2").await, "1 2");
        assert_eq!(client.send("+(1, 2) \"x\"").await, "1 2 3 \"x\"");
    }

    #[tokio::test]
    async fn test_consume_on_reply_clears_after_each_reply() {
        let config = ServerConfig {
            stack_policy: StackPolicy::ConsumeOnReply,
            ..ServerConfig::local()
        };
        let (_server, addr) = started(config).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(client.send("1").await, "1");
        assert_eq!(client.send("2").await, "2");
    }

    #[tokio::test]
    async fn test_unknown_identifier_keeps_connection_open() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        let reply = client.send("doesNotExist()").await;
        assert!(reply.starts_with("\"Error: 1:1: unknown identifier"), "{}", reply);
        assert_eq!(
            client.send("clear() Vector3(1, 2, 3)").await,
            "Vector3(1.0, 2.0, 3.0)"
        );
    }

    #[tokio::test]
    async fn test_execution_error_becomes_marker() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(
            client.send("1 /(1, 0) 2").await,
            "1 \"Error: Division by zero\""
        );
    }

    #[tokio::test]
    async fn test_clients_have_independent_stacks() {
        let (server, addr) = started(ServerConfig::local()).await;
        let mut first = TestClient::connect(addr).await;
        let mut second = TestClient::connect(addr).await;
        assert_eq!(first.send("x = 1 x").await, "1");
        assert_eq!(second.send("2").await, "2");
        assert_eq!(first.send("3").await, "1 3");
        assert!(second.send("x").await.contains("unknown identifier 'x'"));
        assert_eq!(server.peer().clients().len(), 2);
    }

    #[tokio::test]
    async fn test_received_request_events_follow_message_order() {
        let (server, addr) = started(ServerConfig::local()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = seen.clone();
        let _subscription = server.on_received_request().subscribe(move |event| {
            events.lock().unwrap().push(event.text.clone());
        });

        let mut client = TestClient::connect(addr).await;
        for text in ["1", "bogus(", "3"] {
            client.send(text).await;
        }
        // The event for a message is raised after its reply; one more
        // round trip guarantees the first three have fired.
        client.send("4").await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[..3], ["1", "bogus(", "3"]);
    }

    #[tokio::test]
    async fn test_connect_shorthand_matches_translation() {
        let config = ServerConfig {
            bootstrap: crate::config::BootstrapConfig {
                connect_host: "192.168.3.146".into(),
                connect_port: 9999,
            },
            ..ServerConfig::local()
        };
        let server = Server::new(config).unwrap();
        let expected = server
            .context()
            .translate_as(
                Language::Rho,
                "peer.Connect(\"192.168.3.146\", 9999)",
                server.globals(),
            )
            .unwrap();
        match server.globals().get("connect") {
            Some(Value::Closure(closure)) => {
                assert_eq!(*closure.body, expected);
                assert!(closure.scope.is_none());
            }
            other => panic!("Expected connect closure, got {:?}", other),
        }
        for name in ["enter", "join", "leave", "peer", "server", "assert"] {
            assert!(server.globals().contains(name), "{} missing", name);
        }
        assert_eq!(server.context().language(), Language::Pi);
    }

    #[tokio::test]
    async fn test_stop_keeps_existing_connections() {
        let (server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(client.send("1").await, "1");

        server.stop();
        server.stop();
        assert!(server.is_stopping());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(client.send("2").await, "1 2");
    }

    /// Answers every frame with `slow` after `delay`
    async fn slow_remote(delay: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while read_frame(&mut stream).await.is_ok() {
                tokio::time::sleep(delay).await;
                if write_frame(&mut stream, b"slow").await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_stop_during_execution_still_replies() {
        let remote = slow_remote(Duration::from_millis(300)).await;
        let (server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;

        let script = format!(
            "id = peer.Connect(\"127.0.0.1\", {}) peer.Request(id, \"1\")",
            remote.port()
        );
        write_frame(&mut client.0, script.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.stop();

        let reply = String::from_utf8(read_frame(&mut client.0).await.unwrap()).unwrap();
        assert_eq!(reply, "\"slow\"");
        assert!(server.is_stopping());
        assert!(TcpStream::connect(addr).await.is_err());
        assert_eq!(client.send("clear() 2").await, "2");
    }

    #[tokio::test]
    async fn test_deeply_nested_message_gets_error_reply() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        let nested = format!("{}{}", "[".repeat(100_000), "]".repeat(100_000));
        let reply = client.send(&nested).await;
        assert!(reply.starts_with("\"Error: 1:"), "{}", reply);
        assert!(reply.contains("nesting too deep"), "{}", reply);
        assert!(client.send("[".repeat(100_000).as_str()).await.contains("nesting too deep"));
        assert_eq!(client.send("clear() 1").await, "1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recursion_limit_on_default_worker_stacks() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(
            client.send("down = {|n| down(+(n, 1))} down(0)").await,
            "\"Error: Recursion limit of 256 exceeded\""
        );
        assert_eq!(client.send("clear() 1").await, "1");
    }

    #[tokio::test]
    async fn test_server_object_over_the_wire() {
        let (server, addr) = started(ServerConfig::local()).await;
        let mut client = TestClient::connect(addr).await;
        assert_eq!(client.send("server.Port()").await, addr.port().to_string());
        client.send("server.Stop()").await;
        assert!(server.is_stopping());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (_server, addr) = started(ServerConfig::local()).await;
        let config = ServerConfig {
            port: addr.port(),
            ..ServerConfig::local()
        };
        let second = Server::new(config).unwrap();
        assert!(matches!(second.start().await, Err(PyroError::BindError(_))));
    }

    #[tokio::test]
    async fn test_peer_requests_between_servers() {
        let (remote, remote_addr) = started(ServerConfig::local()).await;
        let config = ServerConfig {
            bootstrap: crate::config::BootstrapConfig {
                connect_host: "127.0.0.1".into(),
                connect_port: remote_addr.port(),
            },
            ..ServerConfig::local()
        };
        let local = Server::new(config).unwrap();

        let rho = Context::with_language(local.registry().clone(), Language::Rho);
        let mut exec = local.new_exec();
        let script = rho
            .translate(
                "join()\nanswer = peer.Request(\"+(40, 2)\")\npeer.Request(\"depth()\")\nanswer",
                exec.scope(),
            )
            .unwrap();
        exec.run(&script).await.unwrap();
        assert_eq!(
            exec.data_stack(),
            &[Value::Str("42 1".into()), Value::Str("42".into())]
        );

        let id = local.peer().entered().unwrap();
        let history = local.peer().client(id).unwrap();
        assert_eq!(history.sent().collect::<Vec<_>>(), vec!["+(40, 2)", "depth()"]);
        assert_eq!(remote.peer().clients().len(), 1);

        let leave = rho.translate("leave()", exec.scope()).unwrap();
        exec.run(&leave).await.unwrap();
        assert_eq!(local.peer().entered(), None);
        assert_eq!(exec.data_stack().last(), Some(&Value::Bool(true)));
    }
}
