use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bootstrap::{BootstrapError, BootstrapSequencer, BootstrapState};
use crate::catalog::{ActiveQuery, CatalogError, QueryDescriptor, QueryMode};
use crate::gateway::{GatewayError, QueryGateway, QueryResult, SchemaColumn};
use crate::history::HistoryLog;
use crate::lifecycle::{
    Disposition, LocalRejection, Phase, QueryLifecycleController, RequestId, Submission,
    ViewMode,
};
use crate::presentation::{derive_columns, present, ResultView, TableViewState};

#[derive(Debug)]
pub struct Session<G: QueryGateway + ?Sized> {
    gateway: Arc<G>,
    bootstrap: BootstrapSequencer,
    lifecycle: QueryLifecycleController,
    active_query: ActiveQuery,
    table: TableViewState,
}

#[derive(Debug)]
pub struct SessionView<'a> {
    pub catalog: &'static [QueryDescriptor],
    pub selected_index: usize,
    pub query_mode: QueryMode,
    pub query_text: &'a str,
    pub bootstrap: &'a BootstrapState,
    pub initialize_latency: Option<Duration>,
    pub schema: &'a [SchemaColumn],
    pub schema_warning: Option<&'a str>,
    pub phase: Phase,
    pub error: Option<&'a str>,
    pub execution_time_ms: Option<f64>,
    pub view_mode: ViewMode,
    pub history: &'a HistoryLog,
    pub table: &'a TableViewState,
    pub results: ResultView<'a>,
}

impl<G: QueryGateway + ?Sized> Session<G> {
    #[must_use]
    pub fn new(gateway: Arc<G>, schema_table: impl Into<String>) -> Self {
        Self {
            gateway,
            bootstrap: BootstrapSequencer::new(schema_table),
            lifecycle: QueryLifecycleController::new(),
            active_query: ActiveQuery::default(),
            table: TableViewState::new(),
        }
    }

    #[must_use]
    pub fn gateway(&self) -> Arc<G> {
        Arc::clone(&self.gateway)
    }

    #[must_use]
    pub fn bootstrap_state(&self) -> &BootstrapState {
        self.bootstrap.state()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.bootstrap.is_ready()
    }

    #[must_use]
    pub fn lifecycle(&self) -> &QueryLifecycleController {
        &self.lifecycle
    }

    #[must_use]
    pub fn active_query(&self) -> &ActiveQuery {
        &self.active_query
    }

    #[must_use]
    pub fn table_view(&self) -> &TableViewState {
        &self.table
    }

    pub async fn bootstrap(&mut self) -> Result<&BootstrapState, BootstrapError> {
        self.bootstrap.start(self.gateway.as_ref()).await
    }

    pub fn select_predefined_query(
        &mut self,
        index: usize,
    ) -> Result<&'static QueryDescriptor, CatalogError> {
        self.active_query.select_predefined(index)
    }

    pub fn edit_query_text(&mut self, text: impl Into<String>) {
        self.active_query.edit_text(text);
    }

    pub fn run(&mut self) -> Submission {
        let query = self.active_query.current_text().to_string();
        self.lifecycle.submit(self.bootstrap.is_ready(), &query)
    }

    pub fn rerun(&mut self, query: &str) -> Submission {
        self.lifecycle.submit(self.bootstrap.is_ready(), query)
    }

    pub fn auto_run_if_needed(&mut self) -> Option<Submission> {
        if !self.lifecycle.auto_run_pending(self.bootstrap.is_ready()) {
            return None;
        }
        let query = self.active_query.catalog()[0].text;
        info!(query, "running initial default query");
        Some(self.lifecycle.submit(true, query))
    }

    pub fn complete(
        &mut self,
        request: RequestId,
        outcome: Result<QueryResult, GatewayError>,
    ) -> Disposition {
        let disposition = self.lifecycle.complete(request, outcome);
        let state = self.lifecycle.state();
        if disposition == Disposition::Applied && state.error.is_none() {
            self.table.retain_columns(&derive_columns(&state.results));
        }
        disposition
    }

    /// Rejected submissions are already recorded and come back as `Err`.
    pub async fn drive(&mut self, submission: Submission) -> Result<Disposition, LocalRejection> {
        let ticket = match submission {
            Submission::Dispatched(ticket) => ticket,
            Submission::Rejected(rejection) => return Err(rejection),
        };
        let outcome = self.gateway.execute_query(&ticket.query).await;
        Ok(self.complete(ticket.id, outcome))
    }

    pub async fn run_to_completion(&mut self) -> Result<Disposition, LocalRejection> {
        let submission = self.run();
        self.drive(submission).await
    }

    pub fn toggle_view_mode(&mut self) {
        self.lifecycle.toggle_view();
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.table.set_search_term(term);
    }

    pub fn set_filter_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table.set_filter_columns(columns);
    }

    pub fn toggle_filter_column(&mut self, column: &str) -> bool {
        self.table.toggle_filter_column(column)
    }

    pub fn request_sort(&mut self, column: &str) {
        self.table.request_sort(column);
    }

    #[must_use]
    pub fn view(&self) -> SessionView<'_> {
        let state = self.lifecycle.state();
        SessionView {
            catalog: self.active_query.catalog(),
            selected_index: self.active_query.selected_index(),
            query_mode: self.active_query.mode(),
            query_text: self.active_query.current_text(),
            bootstrap: self.bootstrap.state(),
            initialize_latency: self.bootstrap.initialize_latency(),
            schema: self.bootstrap.schema(),
            schema_warning: self.bootstrap.schema_warning(),
            phase: state.phase,
            error: state.error.as_deref(),
            execution_time_ms: state.execution_time_ms,
            view_mode: state.view_mode,
            history: &state.history,
            table: &self.table,
            results: present(&state.results, &self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::Session;
    use crate::bootstrap::BootstrapState;
    use crate::catalog::{QueryMode, PREDEFINED_QUERIES};
    use crate::gateway::{GatewayError, QueryGateway, QueryResult, Row, SchemaColumn};
    use crate::lifecycle::{
        Disposition, LocalRejection, Phase, Submission, ViewMode, NOT_READY_MESSAGE,
    };

    #[derive(Debug, Default)]
    struct OrdersGateway {
        fail_initialize: AtomicBool,
        execute_calls: AtomicUsize,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl QueryGateway for OrdersGateway {
        async fn initialize(&self) -> Result<(), GatewayError> {
            if self.fail_initialize.load(Ordering::SeqCst) {
                return Err(GatewayError::new("503 Service Unavailable"));
            }
            Ok(())
        }

        async fn execute_query(&self, sql: &str) -> Result<QueryResult, GatewayError> {
            self.execute_calls.fetch_add(1, Ordering::SeqCst);
            self.executed
                .lock()
                .expect("executed lock")
                .push(sql.to_string());
            if sql.contains("missing_table") {
                return Ok(QueryResult::failed("no such table: missing_table", Some(0.4)));
            }
            Ok(QueryResult::succeeded(
                vec![
                    Row::new().with("shipCountry", "Germany").with("order_count", 122),
                    Row::new().with("shipCountry", "USA").with("order_count", 122),
                    Row::new().with("shipCountry", "Brazil").with("order_count", 83),
                ],
                6.0,
            ))
        }

        async fn fetch_schema(&self, _table: &str) -> Result<Vec<SchemaColumn>, GatewayError> {
            Ok(vec![SchemaColumn::new("shipCountry", "TEXT")])
        }
    }

    async fn ready_session() -> (Arc<OrdersGateway>, Session<OrdersGateway>) {
        let gateway = Arc::new(OrdersGateway::default());
        let mut session = Session::new(Arc::clone(&gateway), "orders");
        session.bootstrap().await.expect("bootstrap runs once");
        (gateway, session)
    }

    #[tokio::test]
    async fn failed_bootstrap_blocks_every_run() {
        let gateway = Arc::new(OrdersGateway {
            fail_initialize: AtomicBool::new(true),
            ..OrdersGateway::default()
        });
        let mut session = Session::new(Arc::clone(&gateway), "orders");
        session.bootstrap().await.expect("bootstrap runs once");

        assert!(matches!(
            session.bootstrap_state(),
            BootstrapState::Failed { .. }
        ));
        assert!(session.auto_run_if_needed().is_none());
        let rejection = session
            .run_to_completion()
            .await
            .expect_err("run is rejected");
        assert_eq!(rejection, LocalRejection::NotReady);
        assert_eq!(gateway.execute_calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.view().error, Some(NOT_READY_MESSAGE));
        assert!(session.view().initialize_latency.is_none());
    }

    #[tokio::test]
    async fn auto_run_fires_exactly_once_with_first_query() {
        let (gateway, mut session) = ready_session().await;

        let submission = session.auto_run_if_needed().expect("auto run is owed");
        assert!(session.auto_run_if_needed().is_none());
        session.drive(submission).await.expect("auto run dispatches");

        assert!(session.auto_run_if_needed().is_none());
        assert_eq!(gateway.execute_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            gateway.executed.lock().expect("executed lock").as_slice(),
            [PREDEFINED_QUERIES[0].text]
        );
        let view = session.view();
        assert_eq!(view.results.total_count, 3);
        assert!(view.initialize_latency.is_some());
    }

    #[tokio::test]
    async fn failed_manual_run_also_disables_auto_run() {
        let (gateway, mut session) = ready_session().await;
        session.edit_query_text("SELECT * FROM missing_table");
        session.run_to_completion().await.expect("run dispatches");

        assert!(session.auto_run_if_needed().is_none());
        assert_eq!(gateway.execute_calls.load(Ordering::SeqCst), 1);
        let view = session.view();
        assert_eq!(view.error, Some("no such table: missing_table"));
        assert!(view.results.is_empty());
        assert_eq!(view.execution_time_ms, Some(0.4));
    }

    #[tokio::test]
    async fn run_reads_the_buffer_of_the_active_mode() {
        let (gateway, mut session) = ready_session().await;
        session.edit_query_text("SELECT shipCountry FROM orders");
        session.select_predefined_query(3).expect("index 3 exists");
        assert_eq!(session.view().query_mode, QueryMode::Predefined);
        session.run_to_completion().await.expect("run dispatches");

        session.edit_query_text(session.active_query().custom_text().to_string());
        session.run_to_completion().await.expect("run dispatches");

        assert_eq!(
            gateway.executed.lock().expect("executed lock").as_slice(),
            [PREDEFINED_QUERIES[3].text, "SELECT shipCountry FROM orders"]
        );
    }

    #[tokio::test]
    async fn rerun_from_history_appends_without_reordering() {
        let (_gateway, mut session) = ready_session().await;
        session.edit_query_text("SELECT * FROM missing_table");
        session.run_to_completion().await.expect("run dispatches");
        session.select_predefined_query(0).expect("index 0 exists");
        session.run_to_completion().await.expect("run dispatches");

        let clicked = session
            .view()
            .history
            .get(1)
            .map(|entry| entry.query.clone())
            .expect("older entry exists");
        let submission = session.rerun(&clicked);
        session.drive(submission).await.expect("rerun dispatches");

        let view = session.view();
        let queries = view
            .history
            .iter()
            .map(|entry| entry.query.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            queries,
            vec![
                "SELECT * FROM missing_table",
                PREDEFINED_QUERIES[0].text,
                "SELECT * FROM missing_table",
            ]
        );
    }

    #[tokio::test]
    async fn success_surfaces_results_view_and_presents_rows() {
        let (_gateway, mut session) = ready_session().await;
        session.toggle_view_mode();
        assert_eq!(session.view().view_mode, ViewMode::History);

        session.run_to_completion().await.expect("run dispatches");
        session.set_filter_columns(["shipCountry"]);
        session.set_search_term("us");
        session.request_sort("order_count");

        let view = session.view();
        assert_eq!(view.view_mode, ViewMode::Results);
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.results.columns, vec!["shipCountry", "order_count"]);
        assert_eq!(view.results.filtered_count, 1);
        assert_eq!(view.results.total_count, 3);
        assert_eq!(view.schema.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_keep_only_the_newest_outcome() {
        let (gateway, mut session) = ready_session().await;
        let Submission::Dispatched(first) = session.run() else {
            panic!("first run dispatches");
        };
        session.edit_query_text("SELECT * FROM missing_table");
        let Submission::Dispatched(second) = session.run() else {
            panic!("second run dispatches");
        };

        let newest = gateway.execute_query(&second.query).await;
        assert_eq!(session.complete(second.id, newest), Disposition::Applied);
        let stale = gateway.execute_query(&first.query).await;
        assert_eq!(session.complete(first.id, stale), Disposition::Superseded);

        let view = session.view();
        assert_eq!(view.error, Some("no such table: missing_table"));
        assert!(view.results.is_empty());
        assert_eq!(view.history.len(), 2);
    }
}
