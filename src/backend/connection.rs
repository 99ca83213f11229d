use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::config::BackendConfig;
use crate::context::Context;
use crate::protocol::{
    capabilities, compute_auth_response, decode_binary_row, decode_text_row, encode_execute,
    is_eof_packet, is_err_packet, is_ok_packet, status, AuthSwitchRequest, Command, EofPacket,
    ErrPacket, Field, HandshakeResponse, InitialHandshake, OkPacket, Packet, PacketCodec,
    PayloadReader, StmtPrepareOk, Value, NATIVE_PASSWORD_PLUGIN,
};

use super::{BackendConnection, ConnectionError, ConnectionFactory, QueryResult};

/// Runs a wire command bounded by the context
///
/// The session counts as unusable while the command is on the wire, so a
/// caller dropping the future mid-exchange leaves it poisoned. Only a
/// completed, non-fatal outcome makes it usable again.
macro_rules! guarded {
    ($self:ident, $ctx:expr, $fut:expr) => {{
        if !$self.usable {
            return Err(ConnectionError::Disconnected);
        }
        if let Some(e) = $ctx.err() {
            return Err(ConnectionError::Canceled(e));
        }
        $self.usable = false;
        let result = tokio::select! {
            r = $fut => r,
            e = $ctx.done() => Err(ConnectionError::Canceled(e)),
        };
        match result {
            Err(ref e) if e.is_fatal() => {
                debug!(connection_id = $self.connection_id, error = %e, "Marking backend connection unusable");
            }
            _ => $self.usable = true,
        }
        result
    }};
}

/// A MySQL backend session
pub struct MysqlConnection {
    wire: Wire,
    connection_id: u32,
    server_version: String,
    usable: bool,
    // Field-list reply requested but not yet read
    awaiting_fields: bool,
}

impl MysqlConnection {
    /// Open a session and authenticate with mysql_native_password
    pub async fn connect(config: &BackendConfig) -> Result<Self, ConnectionError> {
        let addr = config.addr();
        debug!(addr = %addr, "Connecting to backend");

        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to connect to backend");
            ConnectionError::Connect(e.to_string())
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let mut wire = Wire {
            framed: Framed::new(stream, PacketCodec),
        };

        let handshake_packet = wire.recv().await?;
        if is_err_packet(&handshake_packet.payload) {
            return Err(server_error(&handshake_packet.payload));
        }
        let handshake = InitialHandshake::parse(&handshake_packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid backend handshake".into()))?;

        debug!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            "Received backend handshake"
        );

        let mut caps = capabilities::DEFAULT_CAPABILITIES & handshake.capability_flags;
        if config.database.is_none() {
            caps &= !capabilities::CLIENT_CONNECT_WITH_DB;
        }

        let response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            // utf8mb4_general_ci
            character_set: 0x2d,
            username: config.user.clone(),
            auth_response: compute_auth_response(&config.password, &handshake.auth_plugin_data()),
            database: config.database.clone(),
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        };
        wire.send(response.encode(handshake_packet.sequence_id.wrapping_add(1)))
            .await?;

        let mut reply = wire.recv().await?;
        if reply.header() == Some(0xFE) {
            let switch = AuthSwitchRequest::parse(&reply.payload)
                .ok_or_else(|| ConnectionError::Protocol("Invalid auth switch request".into()))?;
            if switch.plugin_name != NATIVE_PASSWORD_PLUGIN {
                return Err(ConnectionError::Unsupported(format!(
                    "auth plugin {}",
                    switch.plugin_name
                )));
            }
            let auth = compute_auth_response(&config.password, &switch.plugin_data);
            wire.send(Packet::new(reply.sequence_id.wrapping_add(1), auth))
                .await?;
            reply = wire.recv().await?;
        }

        if is_err_packet(&reply.payload) {
            let err = ErrPacket::parse(&reply.payload)
                .unwrap_or_else(|| ErrPacket::new(1045, "28000", "Access denied"));
            error!(
                error_code = err.error_code,
                error_message = %err.error_message,
                "Backend authentication failed"
            );
            return Err(ConnectionError::Auth(err.error_message));
        }
        if !is_ok_packet(&reply.payload) {
            return Err(ConnectionError::Unsupported(
                "auth method requiring additional exchange".into(),
            ));
        }

        debug!(connection_id = handshake.connection_id, "Backend authentication successful");

        Ok(Self {
            wire,
            connection_id: handshake.connection_id,
            server_version: handshake.server_version,
            usable: true,
            awaiting_fields: false,
        })
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

#[async_trait]
impl BackendConnection for MysqlConnection {
    async fn ping(&mut self, ctx: &Context) -> Result<(), ConnectionError> {
        guarded!(self, ctx, self.wire.simple_command(Command::Ping, &[]))
    }

    async fn select_schema(&mut self, ctx: &Context, schema: &str) -> Result<(), ConnectionError> {
        guarded!(
            self,
            ctx,
            self.wire.simple_command(Command::InitDb, schema.as_bytes())
        )
    }

    async fn request_field_list(
        &mut self,
        ctx: &Context,
        table: &str,
        wildcard: &str,
    ) -> Result<(), ConnectionError> {
        let mut body = BytesMut::with_capacity(table.len() + wildcard.len() + 1);
        body.extend_from_slice(table.as_bytes());
        body.put_u8(0);
        body.extend_from_slice(wildcard.as_bytes());
        let sent = guarded!(
            self,
            ctx,
            self.wire.send(Packet::command(Command::FieldList, &body))
        );
        if sent.is_ok() {
            self.awaiting_fields = true;
        }
        sent
    }

    async fn read_column_definitions(&mut self, ctx: &Context) -> Result<Vec<Field>, ConnectionError> {
        let fields = guarded!(self, ctx, self.wire.read_field_list());
        self.awaiting_fields = false;
        fields
    }

    async fn execute_with_warning_count(
        &mut self,
        ctx: &Context,
        sql: &str,
        want_fields: bool,
    ) -> Result<(QueryResult, u16), ConnectionError> {
        guarded!(self, ctx, self.wire.query(sql, want_fields))
    }

    async fn prepare_and_execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), ConnectionError> {
        guarded!(self, ctx, self.wire.prepare_and_execute(sql, args))
    }

    fn is_usable(&self) -> bool {
        self.usable && !self.awaiting_fields
    }
}

/// Framed socket plus the command/response exchanges
struct Wire {
    framed: Framed<TcpStream, PacketCodec>,
}

impl Wire {
    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.framed
            .send(packet)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            None => Err(ConnectionError::Disconnected),
        }
    }

    /// Command answered by a single OK or ERR packet
    async fn simple_command(&mut self, command: Command, body: &[u8]) -> Result<(), ConnectionError> {
        self.send(Packet::command(command, body)).await?;
        self.read_ok().await.map(|_| ())
    }

    async fn read_ok(&mut self) -> Result<OkPacket, ConnectionError> {
        let packet = self.recv().await?;
        if is_err_packet(&packet.payload) {
            return Err(server_error(&packet.payload));
        }
        OkPacket::parse(&packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Expected OK packet from backend".into()))
    }

    async fn query(&mut self, sql: &str, want_fields: bool) -> Result<(QueryResult, u16), ConnectionError> {
        self.send(Packet::command(Command::Query, sql.as_bytes()))
            .await?;
        let (mut result, warnings) = self.read_result(false).await?;
        if !want_fields {
            result.fields.clear();
        }
        self.drain_more_results(result.status_flags, false).await?;
        Ok((result, warnings))
    }

    async fn prepare_and_execute(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<(QueryResult, u16), ConnectionError> {
        self.send(Packet::command(Command::StmtPrepare, sql.as_bytes()))
            .await?;
        let packet = self.recv().await?;
        if is_err_packet(&packet.payload) {
            return Err(server_error(&packet.payload));
        }
        let prepared = StmtPrepareOk::parse(&packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid COM_STMT_PREPARE response".into()))?;
        if prepared.num_params > 0 {
            self.read_columns(prepared.num_params as usize).await?;
        }
        if prepared.num_columns > 0 {
            self.read_columns(prepared.num_columns as usize).await?;
        }

        let result = if args.len() != prepared.num_params as usize {
            Err(ConnectionError::ParamCount {
                expected: prepared.num_params as usize,
                actual: args.len(),
            })
        } else {
            self.execute_prepared(prepared.statement_id, args).await
        };

        // COM_STMT_CLOSE has no response
        let id = prepared.statement_id.to_le_bytes();
        self.send(Packet::command(Command::StmtClose, &id)).await?;
        result
    }

    async fn execute_prepared(
        &mut self,
        statement_id: u32,
        args: &[Value],
    ) -> Result<(QueryResult, u16), ConnectionError> {
        let body = encode_execute(statement_id, args);
        self.send(Packet::command(Command::StmtExecute, &body))
            .await?;
        let (result, warnings) = self.read_result(true).await?;
        self.drain_more_results(result.status_flags, true).await?;
        Ok((result, warnings))
    }

    /// Read one OK/ERR response or a full result set
    async fn read_result(&mut self, binary: bool) -> Result<(QueryResult, u16), ConnectionError> {
        let packet = self.recv().await?;
        match packet.header() {
            Some(0x00) => {
                let ok = OkPacket::parse(&packet.payload)
                    .ok_or_else(|| ConnectionError::Protocol("Malformed OK packet".into()))?;
                let result = QueryResult::from_ok(ok.affected_rows, ok.last_insert_id, ok.status_flags);
                Ok((result, ok.warnings))
            }
            Some(0xFF) => Err(server_error(&packet.payload)),
            Some(0xFB) => Err(ConnectionError::Protocol(
                "LOCAL INFILE requests are not supported".into(),
            )),
            Some(_) => {
                let column_count = PayloadReader::new(&packet.payload)
                    .lenenc_int()
                    .ok_or_else(|| ConnectionError::Protocol("Malformed column count".into()))?;
                let fields = self.read_columns(column_count as usize).await?;
                let (rows, eof) = self.read_rows(&fields, binary).await?;
                let result = QueryResult {
                    status_flags: eof.status_flags,
                    fields,
                    rows,
                    ..Default::default()
                };
                Ok((result, eof.warnings))
            }
            None => Err(ConnectionError::Protocol("Empty response packet".into())),
        }
    }

    async fn drain_more_results(&mut self, mut status_flags: u16, binary: bool) -> Result<(), ConnectionError> {
        while status_flags & status::SERVER_MORE_RESULTS_EXISTS != 0 {
            let (extra, _) = self.read_result(binary).await?;
            status_flags = extra.status_flags;
        }
        Ok(())
    }

    /// Read `count` column definitions followed by an EOF packet
    async fn read_columns(&mut self, count: usize) -> Result<Vec<Field>, ConnectionError> {
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let packet = self.recv().await?;
            let field = Field::parse(&packet.payload, false)
                .ok_or_else(|| ConnectionError::Protocol("Malformed column definition".into()))?;
            fields.push(field);
        }
        let eof = self.recv().await?;
        if !is_eof_packet(&eof.payload) {
            return Err(ConnectionError::Protocol("Expected EOF after column definitions".into()));
        }
        Ok(fields)
    }

    async fn read_rows(
        &mut self,
        fields: &[Field],
        binary: bool,
    ) -> Result<(Vec<Vec<crate::protocol::Value>>, EofPacket), ConnectionError> {
        let mut rows = Vec::new();
        loop {
            let packet = self.recv().await?;
            if is_eof_packet(&packet.payload) {
                let eof = EofPacket::parse(&packet.payload).unwrap_or_default();
                return Ok((rows, eof));
            }
            if is_err_packet(&packet.payload) {
                return Err(server_error(&packet.payload));
            }
            let row = if binary {
                decode_binary_row(&packet.payload, fields)
            } else {
                decode_text_row(&packet.payload, fields.len())
            };
            rows.push(row.ok_or_else(|| ConnectionError::Protocol("Malformed result row".into()))?);
        }
    }

    /// Column definitions with defaults, terminated by EOF
    async fn read_field_list(&mut self) -> Result<Vec<Field>, ConnectionError> {
        let mut fields = Vec::new();
        loop {
            let packet = self.recv().await?;
            if is_eof_packet(&packet.payload) {
                return Ok(fields);
            }
            if is_err_packet(&packet.payload) {
                return Err(server_error(&packet.payload));
            }
            let field = Field::parse(&packet.payload, true)
                .ok_or_else(|| ConnectionError::Protocol("Malformed column definition".into()))?;
            fields.push(field);
        }
    }
}

fn server_error(payload: &[u8]) -> ConnectionError {
    match ErrPacket::parse(payload) {
        Some(err) => ConnectionError::Server {
            code: err.error_code,
            state: err.sql_state,
            message: err.error_message,
        },
        None => ConnectionError::Protocol("Malformed ERR packet".into()),
    }
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens `MysqlConnection`s to one backend
///
/// Connect and handshake together are bounded by `connect_timeout`, so a
/// backend that accepts TCP and then stalls still yields an error.
#[derive(Debug, Clone)]
pub struct MysqlConnector {
    config: BackendConfig,
    connect_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl ConnectionFactory for MysqlConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        let conn = tokio::time::timeout(self.connect_timeout, MysqlConnection::connect(&self.config))
            .await
            .map_err(|_| {
                error!(
                    addr = %self.config.addr(),
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Backend connect timed out"
                );
                ConnectionError::Connect(format!(
                    "timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        Ok(Box::new(conn))
    }
}
