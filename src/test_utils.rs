/// # Test Utilities Module
///
/// Shared fixtures for gateway tests:
/// - a marketplace database in a temporary directory
/// - a connector wrapper that counts connection opens and closes
/// - connectors that panic while connecting, running statements or closing

use crate::core::db::{
    create_database, ConnectionDescriptor, Connector, FunctionCatalog, Procedure, ProcedureCatalog, Session,
    SqliteConnector, StoredFunction, TabularResult, Value, DEFAULT_PORT,
};
use crate::core::GatewayError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const MARKETPLACE_SCHEMA: &str = include_str!("../demos/marketplace.sql");

const SAMPLE_DATA: &str = "
    INSERT INTO Customer VALUES (1, 'Asha Kulkarni', '9800000001', 'asha@example.com', 'Pune', 'MH', '411001');
    INSERT INTO Customer VALUES (2, 'Ravi Menon', '9800000002', 'ravi@example.com', 'Kochi', 'KL', '682001');
    INSERT INTO Workers VALUES (1, 'Imran Shaikh', '9700000001', 'imran@example.com', 'MH', '411002');
    INSERT INTO Workers VALUES (2, 'Lata Rao', '9700000002', 'lata@example.com', 'KL', '682002');
    INSERT INTO Job VALUES (1, 'Kitchen plumbing', 'Replace sink pipes', 'Open', 1);
    INSERT INTO Job VALUES (2, 'Wall painting', NULL, 'Ongoing', 2);
    INSERT INTO Job VALUES (3, 'Tile repair', NULL, 'Open', 1);
    INSERT INTO Location VALUES (1, 1, 'FC Road', 'Pune', 'MH', '411004');
    INSERT INTO Location VALUES (2, 2, 'MG Road', 'Kochi', 'KL', '682011');
    INSERT INTO Location VALUES (3, 3, 'JM Road', 'Pune', 'MH', '411005');
    INSERT INTO Bids VALUES (1, 1200.0, '2024-05-01', 1);
    INSERT INTO Bids VALUES (2, 1100.0, '2024-05-02', 1);
    INSERT INTO Contract VALUES (1, '2024-05-03', '2024-05-20', 'Active', 2, 2, 2);
    INSERT INTO Payment VALUES (1, 5000.0, '2024-05-21', 'Completed', 1);
    INSERT INTO Payment VALUES (2, 750.0, '2024-05-22', 'Pending', 1);
    INSERT INTO Ratings VALUES (1, 5, '2024-05-23', 2, 2, 2);
    INSERT INTO Ratings VALUES (2, 4, '2024-05-24', 1, 2, 1);
";

/// Notes whose job reference is only checked at commit time.
const DEFERRED_NOTES: &str = "
    CREATE TABLE JobNote (
        Note_Id INTEGER PRIMARY KEY,
        Job_Id  INTEGER NOT NULL REFERENCES Job (Job_Id) DEFERRABLE INITIALLY DEFERRED,
        Body    TEXT
    );
";

pub const DATABASE: &str = "Realestate";

/// Procedures the fixture's connector knows about.
pub fn sample_procedures() -> ProcedureCatalog {
    vec![
        Procedure::new(
            "GetOpenJobsByCity",
            vec!["city".into()],
            vec!["SELECT j.Job_Id, j.Title FROM Job j JOIN Location l ON l.Job_Id = j.Job_Id \
                  WHERE l.City = :city AND j.Status = 'Open' ORDER BY j.Job_Id"
                .into()],
        ),
        Procedure::new(
            "GetWorkerEarnings",
            vec!["worker_id".into()],
            vec!["SELECT c.W_Id, COALESCE(SUM(p.Amount), 0) AS Earnings FROM Contract c \
                  LEFT JOIN Payment p ON p.Co_Id = c.Co_Id AND p.Status = 'Completed' \
                  WHERE c.W_Id = :worker_id GROUP BY c.W_Id"
                .into()],
        ),
        Procedure::new(
            "TwoSets",
            vec![],
            vec![
                "SELECT 1 AS x UNION ALL SELECT 2".into(),
                "SELECT 3 AS y".into(),
            ],
        ),
        Procedure::new(
            "CloseJob",
            vec!["job_id".into()],
            vec![
                "UPDATE Job SET Status = 'Closed' WHERE Job_Id = :job_id".into(),
                "SELECT Job_Id, Status FROM Job WHERE Job_Id = :job_id".into(),
            ],
        ),
        Procedure::new(
            "Touch",
            vec![],
            vec!["UPDATE Job SET Description = 'touched' WHERE Job_Id = 1".into()],
        ),
        Procedure::new(
            "AddJobNote",
            vec!["job_id".into(), "body".into()],
            vec!["INSERT INTO JobNote (Job_Id, Body) VALUES (:job_id, :body)".into()],
        ),
        Procedure::new(
            "Mismatched",
            vec![],
            vec!["SELECT 1 AS a, 2 AS b".into(), "SELECT 3 AS c".into()],
        ),
    ]
    .into_iter()
    .collect()
}

/// Functions the fixture's connector knows about.
pub fn sample_functions() -> FunctionCatalog {
    vec![
        StoredFunction::new(
            "avg_rating",
            vec!["worker_id".into()],
            "SELECT AVG(Score) FROM Ratings WHERE W_Id = :worker_id",
        ),
        StoredFunction::new(
            "total_bids",
            vec!["job_id".into()],
            "SELECT COUNT(*) FROM Bids WHERE Job_Id = :job_id",
        ),
    ]
    .into_iter()
    .collect()
}

/// A populated marketplace database living in a temporary directory.
pub struct MarketplaceFixture {
    _dir: TempDir,
    pub connector: SqliteConnector,
    pub descriptor: ConnectionDescriptor,
}

impl MarketplaceFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let connector = SqliteConnector::new(dir.path())
            .with_procedures(sample_procedures())
            .with_functions(sample_functions());
        create_database(&connector, DATABASE, MARKETPLACE_SCHEMA).expect("schema");

        let seed = rusqlite::Connection::open(connector.database_path(DATABASE).expect("path")).expect("open");
        seed.execute_batch(SAMPLE_DATA).expect("sample data");
        seed.execute_batch(DEFERRED_NOTES).expect("deferred notes");

        MarketplaceFixture {
            _dir: dir,
            connector,
            descriptor: ConnectionDescriptor::new("localhost", DEFAULT_PORT, "root", "", DATABASE),
        }
    }

    /// A descriptor pointing at a host the connector cannot reach.
    pub fn unreachable_descriptor(&self) -> ConnectionDescriptor {
        let mut descriptor = self.descriptor.clone();
        descriptor.host = "10.255.255.1".to_string();
        descriptor
    }

    /// The connector wrapped in open/close counters.
    pub fn counting_connector(&self) -> CountingConnector<SqliteConnector> {
        CountingConnector::new(self.connector.clone())
    }
}

/// Wraps a connector and counts every session opened and closed through it.
#[derive(Debug, Clone)]
pub struct CountingConnector<C> {
    inner: C,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl<C> CountingConnector<C> {
    pub fn new(inner: C) -> Self {
        CountingConnector {
            inner,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handles that stay valid after the connector moves into a gateway.
    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::clone(&self.opened), Arc::clone(&self.closed))
    }
}

impl<C: Connector> Connector for CountingConnector<C> {
    type Session = CountingSession<C::Session>;

    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Self::Session, GatewayError> {
        let session = self.inner.connect(descriptor)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CountingSession {
            inner: Some(session),
            closed: Arc::clone(&self.closed),
        })
    }
}

/// Counts itself as closed exactly once, when dropped.
pub struct CountingSession<S> {
    inner: Option<S>,
    closed: Arc<AtomicUsize>,
}

impl<S: Session> CountingSession<S> {
    fn inner(&mut self) -> Result<&mut S, GatewayError> {
        self.inner
            .as_mut()
            .ok_or_else(|| GatewayError::ConnectionFailed("closed".to_string()))
    }
}

impl<S: Session> Session for CountingSession<S> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<TabularResult, GatewayError> {
        self.inner()?.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, GatewayError> {
        self.inner()?.execute(sql, params)
    }

    fn call(&mut self, procedure: &str, params: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        self.inner()?.call(procedure, params)
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        self.inner()?.commit()
    }

    fn close(mut self) -> Result<(), GatewayError> {
        match self.inner.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl<S> Drop for CountingSession<S> {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector whose sessions panic on every statement.
#[derive(Debug, Clone, Default)]
pub struct PanickingConnector;

pub struct PanickingSession;

impl Connector for PanickingConnector {
    type Session = PanickingSession;

    fn connect(&self, _descriptor: &ConnectionDescriptor) -> Result<PanickingSession, GatewayError> {
        Ok(PanickingSession)
    }
}

impl Session for PanickingSession {
    fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<TabularResult, GatewayError> {
        panic!("driver fault during query")
    }

    fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<usize, GatewayError> {
        panic!("driver fault during execute")
    }

    fn call(&mut self, _procedure: &str, _params: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        panic!("driver fault during call")
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn close(self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Connector that panics while connecting.
#[derive(Debug, Clone, Default)]
pub struct PanicOnConnect;

impl Connector for PanicOnConnect {
    type Session = PanickingSession;

    fn connect(&self, _descriptor: &ConnectionDescriptor) -> Result<PanickingSession, GatewayError> {
        panic!("driver fault during connect")
    }
}

/// Wraps a connector; its sessions work normally but panic when closed.
#[derive(Debug, Clone)]
pub struct PanicOnClose<C>(pub C);

pub struct PanicOnCloseSession<S>(S);

impl<C: Connector> Connector for PanicOnClose<C> {
    type Session = PanicOnCloseSession<C::Session>;

    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Self::Session, GatewayError> {
        self.0.connect(descriptor).map(PanicOnCloseSession)
    }
}

impl<S: Session> Session for PanicOnCloseSession<S> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<TabularResult, GatewayError> {
        self.0.query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, GatewayError> {
        self.0.execute(sql, params)
    }

    fn call(&mut self, procedure: &str, params: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        self.0.call(procedure, params)
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        self.0.commit()
    }

    fn close(self) -> Result<(), GatewayError> {
        drop(self.0);
        panic!("driver fault during close")
    }
}

/// Error testing utilities specific to GatewayError patterns
pub mod error_testing {
    use crate::core::GatewayError;

    pub fn is_connection_failed(err: &GatewayError) -> bool {
        matches!(err, GatewayError::ConnectionFailed(_))
    }

    pub fn is_denied(err: &GatewayError) -> bool {
        matches!(err, GatewayError::AuthorizationDenied { .. })
    }

    pub fn is_execution_failed(err: &GatewayError) -> bool {
        matches!(err, GatewayError::ExecutionFailed(_))
    }

    /// Test that a result is an error of the expected variant
    pub fn assert_error_type<T: std::fmt::Debug>(
        result: &Result<T, GatewayError>,
        expected_variant: fn(&GatewayError) -> bool,
        context: &str,
    ) {
        match result {
            Err(err) => assert!(expected_variant(err), "unexpected error {:?} in {}", err, context),
            Ok(value) => panic!("Expected error but got Ok({:?}) in {}", value, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_has_sample_data() {
        let fixture = MarketplaceFixture::new();
        let conn = rusqlite::Connection::open(fixture.connector.database_path(DATABASE).unwrap()).unwrap();
        let jobs: i64 = conn.query_row("SELECT COUNT(*) FROM Job", [], |row| row.get(0)).unwrap();
        assert_eq!(jobs, 3);
    }

    #[test]
    fn test_counting_connector_counts_drop_as_close() {
        let fixture = MarketplaceFixture::new();
        let counting = fixture.counting_connector();

        let session = counting.connect(&fixture.descriptor).unwrap();
        assert_eq!((counting.opened(), counting.closed()), (1, 0));
        session.close().unwrap();
        assert_eq!((counting.opened(), counting.closed()), (1, 1));

        assert!(counting.connect(&fixture.unreachable_descriptor()).is_err());
        assert_eq!((counting.opened(), counting.closed()), (1, 1));
    }
}
