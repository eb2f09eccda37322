use std::sync::Arc;

use async_trait::async_trait;
use helios_core::{AgentError, StatementKind};
use helios_db::{GlossaryRepository, StatementError, StatementExecutor};

use crate::guardrails::{ApprovalDecision, ApprovalGate, ApprovalRequest, WritePolicy};
use crate::llm::LlmClient;
use crate::tools::{normalize_tool_input, Tool, ToolContext, ToolRegistry};

pub const TEXT_TO_SQL_TOOL: &str = "text_to_sql_tool";
pub const GLOSSARY_TOOL: &str = "glossary_read";

/// Table groups owned by one read/write tool pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlDomain {
    Sales,
    Finance,
    Inventory,
}

impl SqlDomain {
    pub const ALL: [SqlDomain; 3] = [SqlDomain::Sales, SqlDomain::Finance, SqlDomain::Inventory];

    pub fn read_tool_name(self) -> &'static str {
        match self {
            Self::Sales => "sales_sql_read",
            Self::Finance => "finance_sql_read",
            Self::Inventory => "inventory_sql_read",
        }
    }

    pub fn write_tool_name(self) -> &'static str {
        match self {
            Self::Sales => "sales_sql_write",
            Self::Finance => "finance_sql_write",
            Self::Inventory => "inventory_sql_write",
        }
    }

    fn read_description(self) -> &'static str {
        match self {
            Self::Sales => "Executes read-only SQL queries on sales tables (customers, leads, orders, order_items).",
            Self::Finance => "Executes read-only SQL queries on financial tables (invoices, payments, ledger_entries).",
            Self::Inventory => "Executes read-only SQL queries on inventory tables (products, stock, suppliers, purchase_orders).",
        }
    }

    fn write_description(self) -> &'static str {
        match self {
            Self::Sales => "Executes write SQL operations (INSERT, UPDATE, DELETE) on sales tables. Requires approval for sensitive actions.",
            Self::Finance => "Executes write SQL operations (INSERT, UPDATE, DELETE) on financial tables. Requires approval for sensitive actions.",
            Self::Inventory => "Executes write SQL operations (INSERT, UPDATE, DELETE) on inventory tables. Requires approval for sensitive actions.",
        }
    }
}

fn sql_error(error: &StatementError) -> String {
    AgentError::QueryExecution(error.to_string()).observation()
}

pub struct SqlReadTool {
    domain: SqlDomain,
    executor: StatementExecutor,
}

impl SqlReadTool {
    pub fn new(domain: SqlDomain, executor: StatementExecutor) -> Self {
        Self { domain, executor }
    }
}

#[async_trait]
impl Tool for SqlReadTool {
    fn name(&self) -> &str {
        self.domain.read_tool_name()
    }

    fn description(&self) -> &str {
        self.domain.read_description()
    }

    async fn run(&self, input: &str, _context: &ToolContext) -> String {
        let sql = normalize_tool_input(input);
        match self.executor.read(&sql).await {
            Ok(output) => output.to_markdown(),
            Err(StatementError::Rejected(reason)) => format!(
                "SQL Error: {reason}. Use {} for changes.",
                self.domain.write_tool_name()
            ),
            Err(error) => sql_error(&error),
        }
    }
}

/// Write tool pair member; sensitive statements go through the approval gate first.
pub struct SqlWriteTool {
    domain: SqlDomain,
    executor: StatementExecutor,
    gate: Arc<dyn ApprovalGate>,
    policy: WritePolicy,
}

impl SqlWriteTool {
    pub fn new(
        domain: SqlDomain,
        executor: StatementExecutor,
        gate: Arc<dyn ApprovalGate>,
        policy: WritePolicy,
    ) -> Self {
        Self { domain, executor, gate, policy }
    }
}

#[async_trait]
impl Tool for SqlWriteTool {
    fn name(&self) -> &str {
        self.domain.write_tool_name()
    }

    fn description(&self) -> &str {
        self.domain.write_description()
    }

    async fn run(&self, input: &str, context: &ToolContext) -> String {
        let sql = normalize_tool_input(input);
        let kind = StatementKind::classify(&sql);

        if self.policy.is_sensitive(kind) {
            let request = ApprovalRequest { tool_name: self.name(), statement: &sql, kind };
            if let ApprovalDecision::Refused { reason_code } =
                self.gate.review(request, context).await
            {
                tracing::warn!(
                    event_name = "system.agent.approval.refused",
                    tool = self.name(),
                    session_id = %context.session_id,
                    statement_kind = %kind,
                    reason_code,
                    "sensitive write refused"
                );
                return AgentError::ApprovalRequired { statement_kind: kind }.observation();
            }
            tracing::info!(
                event_name = "system.agent.approval.granted",
                tool = self.name(),
                session_id = %context.session_id,
                statement_kind = %kind,
                "sensitive write approved"
            );
        }

        match self.executor.write(&sql).await {
            Ok(rows) => format!("SQL write operation successful. Rows affected: {rows}"),
            Err(error) => sql_error(&error),
        }
    }
}

/// Tables and columns the text-to-query tool may reference.
const SCHEMA_SUMMARY: &str = "\
customers(id, name, email, phone, address, created_at)
leads(id, name, email, company, status, source, created_at)
products(id, sku, name, description, price, stock_quantity, created_at)
orders(id, customer_id, order_date, total_amount, status)
order_items(id, order_id, product_id, quantity, unit_price)
invoices(id, customer_id, order_id, invoice_date, amount, status)
payments(id, invoice_id, amount, payment_date, method)
ledger_entries(id, invoice_id, account, debit, credit, memo, entry_date)
stock(id, product_id, warehouse, quantity, reorder_level)
suppliers(id, name, email, phone)
purchase_orders(id, po_number, supplier_id, product_id, quantity, unit_cost, status, ordered_at)
glossary(term, definition)";

/// Translates a question into SQL with the inference service, then runs it as a read.
pub struct TextToSqlTool {
    llm: Arc<dyn LlmClient>,
    executor: StatementExecutor,
}

impl TextToSqlTool {
    pub fn new(llm: Arc<dyn LlmClient>, executor: StatementExecutor) -> Self {
        Self { llm, executor }
    }

    fn prompt(question: &str) -> String {
        format!(
            "Given the database schema below, write a concise, valid SQLite SQL query that answers the user's question.\n\
             Return only the SQL query.\n\
             Tables:\n{SCHEMA_SUMMARY}\n\
             Question: {question}\n\
             SQL Query:"
        )
    }
}

/// Pulls the statement out of a completion that may carry fences or a leading label.
fn extract_sql(completion: &str) -> String {
    let trimmed = completion.trim();
    let trimmed = trimmed
        .strip_prefix("SQL Query:")
        .or_else(|| trimmed.strip_prefix("SQL:"))
        .unwrap_or(trimmed);
    // Prose around a fenced block is dropped.
    let body = match trimmed.find("```") {
        Some(start) => {
            let fenced = &trimmed[start..];
            match fenced[3..].find("```") {
                Some(end) => &fenced[..end + 6],
                None => fenced,
            }
        }
        None => trimmed,
    };
    normalize_tool_input(body)
}

#[async_trait]
impl Tool for TextToSqlTool {
    fn name(&self) -> &str {
        TEXT_TO_SQL_TOOL
    }

    fn description(&self) -> &str {
        "Converts a natural language question into a SQLite SQL query and executes it."
    }

    async fn run(&self, input: &str, context: &ToolContext) -> String {
        let question = normalize_tool_input(input);
        let completion = match self.llm.complete(&Self::prompt(&question)).await {
            Ok(completion) => completion,
            Err(error) => return format!("Error translating or executing SQL: {error}"),
        };

        let sql = extract_sql(&completion);
        tracing::debug!(
            event_name = "system.agent.text_to_sql.generated",
            session_id = %context.session_id,
            sql = %sql,
            "generated query"
        );
        match self.executor.read(&sql).await {
            Ok(output) => output.to_markdown(),
            Err(error) => format!("Error translating or executing SQL: {error}"),
        }
    }
}

pub struct GlossaryTool {
    repository: Arc<dyn GlossaryRepository>,
}

impl GlossaryTool {
    pub fn new(repository: Arc<dyn GlossaryRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Tool for GlossaryTool {
    fn name(&self) -> &str {
        GLOSSARY_TOOL
    }

    fn description(&self) -> &str {
        "Retrieves the definition of a specific business term from the glossary table."
    }

    async fn run(&self, input: &str, _context: &ToolContext) -> String {
        let term = normalize_tool_input(input);
        match self.repository.definition(&term).await {
            Ok(Some(definition)) => definition,
            Ok(None) => format!("Term '{term}' not found."),
            Err(error) => AgentError::QueryExecution(error.to_string()).observation(),
        }
    }
}

/// Everything the default tool catalogue is built from.
pub struct ToolDependencies {
    pub executor: StatementExecutor,
    pub glossary: Arc<dyn GlossaryRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub gate: Arc<dyn ApprovalGate>,
    pub policy: WritePolicy,
}

/// Registers the eight catalogue tools.
pub fn register_default_tools(registry: &mut ToolRegistry, deps: ToolDependencies) {
    for domain in SqlDomain::ALL {
        registry.register(SqlReadTool::new(domain, deps.executor.clone()));
        registry.register(SqlWriteTool::new(
            domain,
            deps.executor.clone(),
            Arc::clone(&deps.gate),
            deps.policy,
        ));
    }
    registry.register(TextToSqlTool::new(deps.llm, deps.executor));
    registry.register(GlossaryTool::new(deps.glossary));
    tracing::info!(
        event_name = "system.agent.tools.catalogue_ready",
        tools = registry.len(),
        "tool catalogue registered"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helios_core::SessionId;
    use helios_db::{
        connect_with_settings, migrations, InMemoryGlossaryRepository, SampleDataset,
        SqlGlossaryRepository, StatementExecutor,
    };

    use super::{
        extract_sql, register_default_tools, GlossaryTool, SqlDomain, SqlReadTool, SqlWriteTool,
        TextToSqlTool, ToolDependencies,
    };
    use crate::guardrails::{TokenApprovalGate, WritePolicy};
    use crate::llm::ScriptedLlm;
    use crate::tools::{Tool, ToolContext, ToolRegistry};

    async fn seeded_executor() -> StatementExecutor {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SampleDataset::load(&pool).await.expect("seed");
        StatementExecutor::new(pool)
    }

    fn context(token: Option<&str>) -> ToolContext {
        ToolContext::new(SessionId("tools".to_string()))
            .with_approval_token(token.map(|t| t.to_string().into()))
    }

    fn write_tool(executor: StatementExecutor, policy: WritePolicy) -> SqlWriteTool {
        SqlWriteTool::new(
            SqlDomain::Sales,
            executor,
            Arc::new(TokenApprovalGate::new(Some("let-me-in".to_string().into()))),
            policy,
        )
    }

    async fn count(executor: &StatementExecutor, sql: &str) -> String {
        executor.read(sql).await.expect("count").to_markdown()
    }

    #[tokio::test]
    async fn sales_read_lists_seeded_customers() {
        let tool = SqlReadTool::new(SqlDomain::Sales, seeded_executor().await);
        let output = tool.run("```sql\nSELECT name, email FROM customers\n```", &context(None)).await;

        assert!(output.contains("john@example.com"), "{output}");
        assert!(output.starts_with("| name | email |"));
    }

    #[tokio::test]
    async fn read_tool_refuses_mutations() {
        let executor = seeded_executor().await;
        let tool = SqlReadTool::new(SqlDomain::Finance, executor.clone());
        let output = tool.run("DELETE FROM payments", &context(None)).await;

        assert!(output.starts_with("SQL Error: only read-only statements"), "{output}");
        assert!(output.contains("finance_sql_write"));
        assert!(count(&executor, "SELECT COUNT(*) AS n FROM payments").await.contains("| 1 |"));
    }

    #[tokio::test]
    async fn read_tool_reports_store_errors_as_text() {
        let tool = SqlReadTool::new(SqlDomain::Inventory, seeded_executor().await);
        let output = tool.run("SELECT * FROM warehouses", &context(None)).await;
        assert!(output.starts_with("SQL Error:"), "{output}");
        assert!(output.contains("no such table"));
    }

    #[tokio::test]
    async fn sensitive_write_without_token_is_not_executed() {
        let executor = seeded_executor().await;
        let tool = write_tool(executor.clone(), WritePolicy::default());

        let output = tool.run("DELETE FROM leads", &context(None)).await;

        assert!(output.starts_with("Approval required: delete statements"), "{output}");
        assert!(count(&executor, "SELECT COUNT(*) AS n FROM leads").await.contains("| 3 |"));
    }

    #[tokio::test]
    async fn sensitive_write_with_token_runs() {
        let executor = seeded_executor().await;
        let tool = write_tool(executor.clone(), WritePolicy::default());

        let output = tool
            .run("UPDATE leads SET status = 'won' WHERE email = 'alice@company.com'", &context(Some("let-me-in")))
            .await;

        assert_eq!(output, "SQL write operation successful. Rows affected: 1");
    }

    #[tokio::test]
    async fn inserts_follow_policy() {
        let executor = seeded_executor().await;
        let insert = "INSERT INTO leads (name, email, company) VALUES ('Eve Adams', 'eve@acme.io', 'Acme')";

        let relaxed = write_tool(executor.clone(), WritePolicy::default());
        assert_eq!(
            relaxed.run(insert, &context(None)).await,
            "SQL write operation successful. Rows affected: 1"
        );

        let strict = write_tool(executor, WritePolicy { require_for_inserts: true });
        assert!(strict.run(insert, &context(None)).await.starts_with("Approval required: insert"));
    }

    #[tokio::test]
    async fn stacked_write_behind_comment_marker_is_caught() {
        let executor = seeded_executor().await;
        let tool = write_tool(executor.clone(), WritePolicy::default());
        let sql = "INSERT INTO leads (name, email) VALUES ('--', 'z@z.z'); DELETE FROM leads";

        let refused = tool.run(sql, &context(None)).await;
        assert!(refused.starts_with("Approval required: delete statements"), "{refused}");

        let approved = tool.run(sql, &context(Some("let-me-in"))).await;
        assert!(approved.starts_with("SQL Error: exactly one statement"), "{approved}");
        assert!(count(&executor, "SELECT COUNT(*) AS n FROM leads").await.contains("| 3 |"));
    }

    #[tokio::test]
    async fn read_tool_refuses_hidden_second_statement() {
        let executor = seeded_executor().await;
        let tool = SqlReadTool::new(SqlDomain::Sales, executor.clone());

        let output = tool.run("SELECT '--'; DELETE FROM leads", &context(None)).await;
        assert!(output.starts_with("SQL Error:"), "{output}");
        assert!(count(&executor, "SELECT COUNT(*) AS n FROM leads").await.contains("| 3 |"));

        let output = tool.run("PRAGMA foreign_keys(OFF)", &context(None)).await;
        assert!(output.starts_with("SQL Error: only read-only statements"), "{output}");
        let pragma = executor.read("PRAGMA foreign_keys").await.expect("pragma");
        assert_eq!(pragma.to_markdown().lines().last(), Some("| 1 |"));
    }

    #[tokio::test]
    async fn malformed_write_returns_error_text() {
        let tool = write_tool(seeded_executor().await, WritePolicy::default());
        let output = tool.run("INSERT INTO leads (nme) VALUES ('x')", &context(None)).await;
        assert!(output.starts_with("SQL Error:"), "{output}");
    }

    #[tokio::test]
    async fn text_to_sql_strips_fences_and_executes() {
        let llm = Arc::new(ScriptedLlm::new([
            "Here you go:\n```sql\nSELECT COUNT(*) AS open_invoices FROM invoices WHERE status = 'pending';\n```",
        ]));
        let tool = TextToSqlTool::new(llm.clone(), seeded_executor().await);

        let output = tool.run("How many invoices are pending?", &context(None)).await;

        assert_eq!(output, "| open_invoices |\n| --- |\n| 1 |");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("Question: How many invoices are pending?"));
        assert!(prompt.trim_end().ends_with("SQL Query:"));
    }

    #[tokio::test]
    async fn text_to_sql_refuses_generated_mutations() {
        let llm = Arc::new(ScriptedLlm::new(["DROP TABLE customers"]));
        let executor = seeded_executor().await;
        let tool = TextToSqlTool::new(llm, executor.clone());

        let output = tool.run("remove all customers", &context(None)).await;

        assert!(output.starts_with("Error translating or executing SQL:"), "{output}");
        assert!(count(&executor, "SELECT COUNT(*) AS n FROM customers").await.contains("| 3 |"));
    }

    #[tokio::test]
    async fn text_to_sql_reports_inference_failure() {
        let tool = TextToSqlTool::new(Arc::new(ScriptedLlm::default()), seeded_executor().await);
        let output = tool.run("anything", &context(None)).await;
        assert!(output.starts_with("Error translating or executing SQL:"));
    }

    #[test]
    fn extract_sql_handles_labels_and_fences() {
        assert_eq!(extract_sql("SQL Query: SELECT 1"), "SELECT 1");
        assert_eq!(extract_sql("```SELECT 2```"), "SELECT 2");
        assert_eq!(extract_sql("Sure!\n```sqlite\nSELECT 3\n```\nThis counts rows."), "SELECT 3");
    }

    #[tokio::test]
    async fn glossary_lookup_hits_and_misses() {
        let executor = seeded_executor().await;
        let tool = GlossaryTool::new(Arc::new(SqlGlossaryRepository::new(executor.pool().clone())));

        assert!(tool.run("'AOV'", &context(None)).await.starts_with("Average order value"));
        assert_eq!(tool.run("EBITDA", &context(None)).await, "Term 'EBITDA' not found.");
    }

    #[tokio::test]
    async fn default_catalogue_registers_every_tool() {
        let mut registry = ToolRegistry::new();
        register_default_tools(
            &mut registry,
            ToolDependencies {
                executor: seeded_executor().await,
                glossary: Arc::new(InMemoryGlossaryRepository::default()),
                llm: Arc::new(ScriptedLlm::default()),
                gate: Arc::new(TokenApprovalGate::new(None)),
                policy: WritePolicy::default(),
            },
        );

        assert_eq!(
            registry.names(),
            vec![
                "finance_sql_read",
                "finance_sql_write",
                "glossary_read",
                "inventory_sql_read",
                "inventory_sql_write",
                "sales_sql_read",
                "sales_sql_write",
                "text_to_sql_tool",
            ]
        );
    }
}
