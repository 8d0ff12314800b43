//! Stored-procedure dispatch table.
//!
//! Operation descriptors are resolved once at startup into a fixed set of
//! callable entries; there is no runtime reflection. A call validates its
//! arguments against the descriptor's parameter list, renders a positional
//! statement, and runs it through the guarded connector.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::SqlConnector;
use crate::pool::{ExecResult, PoolBackend, Statement};
use crate::types::{Error, Result};

/// Parameter types supported by the wire driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Int,
    BigInt,
    Float,
    Text,
    Bool,
    Timestamp,
    Json,
}

impl SqlType {
    /// Whether a JSON argument is a valid wire value for this type.
    /// `Null` is always accepted (rendered as SQL NULL).
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Int | SqlType::BigInt, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (SqlType::Float, Value::Number(_)) => true,
            (SqlType::Text | SqlType::Timestamp, Value::String(_)) => true,
            (SqlType::Bool, Value::Bool(_)) => true,
            (SqlType::Json, _) => true,
            _ => false,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SqlType::Int => "int",
            SqlType::BigInt => "bigint",
            SqlType::Float => "float",
            SqlType::Text => "text",
            SqlType::Bool => "bool",
            SqlType::Timestamp => "timestamp",
            SqlType::Json => "json",
        }
    }
}

impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(SqlType::Int),
            "bigint" => Ok(SqlType::BigInt),
            "float" => Ok(SqlType::Float),
            "text" => Ok(SqlType::Text),
            "bool" => Ok(SqlType::Bool),
            "timestamp" => Ok(SqlType::Timestamp),
            "json" => Ok(SqlType::Json),
            other => Err(Error::validation(format!("unknown sql type: {other}"))),
        }
    }
}

/// One named parameter of a stored procedure.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub sql_type: SqlType,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, sql_type: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            sql_type: sql_type.parse()?,
        })
    }
}

/// Typed descriptor for one callable operation.
#[derive(Debug, Clone)]
pub struct ProcDescriptor {
    pub name: String,
    pub params: Vec<ParamDef>,
}

/// Row window for one call.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }
}

/// Fixed dispatch table from operation name to descriptor.
pub struct ProcSet<B: PoolBackend> {
    connector: Arc<SqlConnector<B>>,
    procs: HashMap<String, ProcDescriptor>,
    order: Vec<String>,
}

impl<B: PoolBackend> fmt::Debug for ProcSet<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcSet").field("procs", &self.order).finish()
    }
}

impl<B: PoolBackend> ProcSet<B> {
    /// Resolve descriptors into a dispatch table. Duplicate names are
    /// rejected at build time, not at call time.
    pub fn build(
        connector: Arc<SqlConnector<B>>,
        descriptors: Vec<ProcDescriptor>,
    ) -> Result<Self> {
        let mut procs = HashMap::new();
        let mut order = Vec::new();
        for desc in descriptors {
            if procs.contains_key(&desc.name) {
                return Err(Error::validation(format!(
                    "duplicate operation descriptor: {}",
                    desc.name
                )));
            }
            order.push(desc.name.clone());
            procs.insert(desc.name.clone(), desc);
        }
        Ok(Self {
            connector,
            procs,
            order,
        })
    }

    /// Operation names, in descriptor order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Invoke one operation with named arguments.
    ///
    /// Missing arguments are passed as SQL NULL; unknown argument names and
    /// values outside the declared parameter type are rejected before
    /// anything reaches the pool.
    pub async fn call(
        &self,
        operation: &str,
        args: &HashMap<String, Value>,
        page: Page,
    ) -> Result<ExecResult> {
        let desc = self
            .procs
            .get(operation)
            .ok_or_else(|| Error::unknown_operation(operation))?;

        for (key, value) in args {
            let Some(param) = desc.params.iter().find(|p| &p.name == key) else {
                return Err(Error::validation(format!(
                    "unknown argument '{key}' for operation '{operation}'"
                )));
            };
            if !param.sql_type.accepts(value) {
                return Err(Error::validation(format!(
                    "argument '{key}' of operation '{operation}' is not a valid {}",
                    param.sql_type.as_str()
                )));
            }
        }

        let params: Vec<Value> = desc
            .params
            .iter()
            .map(|p| args.get(&p.name).cloned().unwrap_or(Value::Null))
            .collect();
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${i}")).collect();

        let mut text = format!("select * from {}({})", desc.name, placeholders.join(", "));
        if let Some(limit) = page.limit {
            text.push_str(&format!(" limit {limit}"));
        }
        if page.offset > 0 {
            text.push_str(&format!(" offset {}", page.offset));
        }

        self.connector.exec(&Statement::with_params(text, params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::CounterRegistry;
    use crate::pool::BackendError;
    use crate::service::ServiceRegistry;
    use crate::types::ConnectorConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingBackend {
        statements: Mutex<Vec<Statement>>,
    }

    #[async_trait]
    impl PoolBackend for Arc<CapturingBackend> {
        type Conn = ();

        async fn connect(&self) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        async fn execute(
            &self,
            _conn: &mut (),
            statement: &Statement,
        ) -> std::result::Result<ExecResult, BackendError> {
            self.statements.lock().unwrap().push(statement.clone());
            Ok(ExecResult::default())
        }
    }

    async fn fixture(
        descriptors: Vec<ProcDescriptor>,
    ) -> (
        Arc<ServiceRegistry>,
        Arc<CapturingBackend>,
        ProcSet<Arc<CapturingBackend>>,
    ) {
        let services = ServiceRegistry::new();
        let counters = Arc::new(CounterRegistry::new());
        let backend = Arc::new(CapturingBackend::default());
        let connector = SqlConnector::register(
            &services,
            &counters,
            "db",
            vec![],
            ConnectorConfig::default(),
            Arc::clone(&backend),
        )
        .unwrap();
        connector.service().start().await.unwrap();
        let procs = ProcSet::build(connector, descriptors).unwrap();
        (services, backend, procs)
    }

    fn get_orders() -> ProcDescriptor {
        ProcDescriptor {
            name: "get_orders".to_string(),
            params: vec![
                ParamDef::new("customer_id", "bigint").unwrap(),
                ParamDef::new("since", "timestamp").unwrap(),
            ],
        }
    }

    #[tokio::test]
    async fn call_renders_positional_statement_in_declared_order() {
        let (_services, backend, procs) = fixture(vec![get_orders()]).await;

        let mut args = HashMap::new();
        args.insert("since".to_string(), Value::String("2026-01-01".into()));
        args.insert("customer_id".to_string(), Value::from(42));
        procs
            .call("get_orders", &args, Page::default())
            .await
            .unwrap();

        let statements = backend.statements.lock().unwrap();
        // statements[0] is the startup canary
        let stmt = &statements[1];
        assert_eq!(stmt.text, "select * from get_orders($1, $2)");
        assert_eq!(stmt.params, vec![Value::from(42), Value::from("2026-01-01")]);
    }

    #[tokio::test]
    async fn missing_arguments_become_null() {
        let (_services, backend, procs) = fixture(vec![get_orders()]).await;

        procs
            .call("get_orders", &HashMap::new(), Page::default())
            .await
            .unwrap();
        let statements = backend.statements.lock().unwrap();
        assert_eq!(statements[1].params, vec![Value::Null, Value::Null]);
    }

    #[tokio::test]
    async fn paging_clauses_are_appended() {
        let (_services, backend, procs) = fixture(vec![get_orders()]).await;

        procs
            .call(
                "get_orders",
                &HashMap::new(),
                Page {
                    offset: 20,
                    limit: Some(10),
                },
            )
            .await
            .unwrap();
        let statements = backend.statements.lock().unwrap();
        assert_eq!(
            statements[1].text,
            "select * from get_orders($1, $2) limit 10 offset 20"
        );
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let (_services, _backend, procs) = fixture(vec![get_orders()]).await;
        let err = procs
            .call("drop_everything", &HashMap::new(), Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn unknown_argument_is_rejected_before_execution() {
        let (_services, backend, procs) = fixture(vec![get_orders()]).await;

        let mut args = HashMap::new();
        args.insert("surprise".to_string(), Value::from(1));
        let err = procs
            .call("get_orders", &args, Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(backend.statements.lock().unwrap().len(), 1); // canary only
    }

    #[tokio::test]
    async fn duplicate_descriptor_fails_the_build() {
        let services = ServiceRegistry::new();
        let counters = Arc::new(CounterRegistry::new());
        let backend = Arc::new(CapturingBackend::default());
        let connector = SqlConnector::register(
            &services,
            &counters,
            "db",
            vec![],
            ConnectorConfig::default(),
            backend,
        )
        .unwrap();

        let err = ProcSet::build(connector, vec![get_orders(), get_orders()]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn mistyped_argument_is_rejected_before_execution() {
        let (_services, backend, procs) = fixture(vec![get_orders()]).await;

        let mut args = HashMap::new();
        args.insert(
            "customer_id".to_string(),
            serde_json::json!({"not": "a bigint"}),
        );
        let err = procs
            .call("get_orders", &args, Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("customer_id"), "{err}");
        assert_eq!(backend.statements.lock().unwrap().len(), 1); // canary only
    }

    #[tokio::test]
    async fn typed_arguments_pass_validation() {
        let (_services, _backend, procs) = fixture(vec![ProcDescriptor {
            name: "touch".to_string(),
            params: vec![
                ParamDef::new("count", "int").unwrap(),
                ParamDef::new("ratio", "float").unwrap(),
                ParamDef::new("active", "bool").unwrap(),
                ParamDef::new("payload", "json").unwrap(),
            ],
        }])
        .await;

        let mut args = HashMap::new();
        args.insert("count".to_string(), Value::from(3));
        args.insert("ratio".to_string(), Value::from(0.5));
        args.insert("active".to_string(), Value::Bool(true));
        args.insert("payload".to_string(), serde_json::json!({"k": [1, 2]}));
        procs.call("touch", &args, Page::default()).await.unwrap();

        // Explicit null is always a valid wire value
        let mut args = HashMap::new();
        args.insert("count".to_string(), Value::Null);
        procs.call("touch", &args, Page::default()).await.unwrap();

        // A fractional number is not an int
        let mut args = HashMap::new();
        args.insert("count".to_string(), Value::from(1.5));
        let err = procs
            .call("touch", &args, Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_sql_type_is_rejected() {
        let err = ParamDef::new("x", "uuid5").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(ParamDef::new("x", "bigint").is_ok());
    }
}
