use super::*;
use crate::context::Endpoints;
use crate::database::{ColumnMeta, ForeignKeyMeta, MemoryDatabase};
use crate::model::TableField;
use crate::strategy::Strategy;
use std::cell::RefCell;
use std::rc::Rc;

fn visitor_columns() -> Vec<ColumnMeta> {
    vec![
        ColumnMeta::new("ID", "integer").not_null(),
        ColumnMeta::new("SURNAME", "character varying").with_max_length(40),
        ColumnMeta::new("ZIPCODE", "character varying").with_max_length(10),
    ]
}

fn order_columns() -> Vec<ColumnMeta> {
    vec![
        ColumnMeta::new("NR", "integer").not_null(),
        ColumnMeta::new("VISITOR_ID", "integer"),
        ColumnMeta::new("AMOUNT", "integer"),
    ]
}

fn source(visitors: Vec<Vec<Value>>, orders: Vec<Vec<Value>>) -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table("public", "VISITOR", visitor_columns(), &["ID"])
        .with_table("public", "ORDERS", order_columns(), &["NR"])
        .with_foreign_key(
            "public",
            ForeignKeyMeta {
                constraint: "orders_visitor_fk".to_string(),
                child_table: "ORDERS".to_string(),
                child_column: "VISITOR_ID".to_string(),
                parent_table: "VISITOR".to_string(),
                parent_column: "ID".to_string(),
                position: 1,
            },
        )
        .with_rows("public", "VISITOR", visitors)
        .with_rows("public", "ORDERS", orders)
}

fn destination() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_table("public", "VISITOR", visitor_columns(), &["ID"])
        .with_table("public", "ORDERS", order_columns(), &["NR"])
}

fn visitor(id: i64, surname: &str, zipcode: Option<&str>) -> Vec<Value> {
    vec![Value::Int(id), surname.into(), zipcode.into()]
}

fn order(nr: i64, visitor_id: i64, amount: i64) -> Vec<Value> {
    vec![Value::Int(nr), Value::Int(visitor_id), Value::Int(amount)]
}

fn site(table: &str, column: Option<&str>) -> TableField {
    TableField::new("public", table, column)
}

fn anonymizer<'a>(
    src: &'a MemoryDatabase,
    dst: &'a MemoryDatabase,
    tr: &'a MemoryDatabase,
    registry: StrategyRegistry,
    rules: Vec<Rule>,
    scope: &[&str],
) -> Result<Anonymizer<'a>, AnonymizerError> {
    let ctx = RunContext::new(
        "public",
        Endpoints {
            source: src,
            destination: dst,
            transformation: tr,
        },
        Some(11),
    );
    Anonymizer::new(ctx, registry, rules, scope.iter().map(|s| (*s).to_string()).collect())
}

fn run(
    src: &MemoryDatabase,
    dst: &MemoryDatabase,
    tr: &MemoryDatabase,
    rules: Vec<Rule>,
    scope: &[&str],
) -> Result<RunReport, AnonymizerError> {
    anonymizer(src, dst, tr, StrategyRegistry::with_defaults(), rules, scope)?.run()
}

/// Returns `additional_info` copies of every value, suffixed with their index
struct FanOut;

impl Strategy for FanOut {
    fn name(&self) -> &str {
        "FanOut"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        let copies: usize = rule.additional_info().parse().unwrap_or(1);
        Ok((0..copies).map(|i| Value::Text(format!("{value}-{i}"))).collect())
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}

/// Records the site of every rule it is applied under
struct Recorder(Rc<RefCell<Vec<String>>>);

impl Strategy for Recorder {
    fn name(&self) -> &str {
        "Record"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        self.0.borrow_mut().push(rule.field().to_string());
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}

/// Has no pseudonym for the visitor with ID 2
struct Unmapped;

impl Strategy for Unmapped {
    fn name(&self) -> &str {
        "Unmapped"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        _rule: &Rule,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        if row.get("ID") == Some(&Value::Int(2)) {
            return Err(StrategyError::KeyNotFound {
                table: "VISITOR_LOOKUP".to_string(),
                value: value.to_string(),
            });
        }
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}

/// Fails to transform the visitor with ID 2
struct Faulty;

impl Strategy for Faulty {
    fn name(&self) -> &str {
        "Faulty"
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        rule: &Rule,
        row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        if row.get("ID") == Some(&Value::Int(2)) {
            return Err(StrategyError::TransformationFailed {
                rule: rule.to_string(),
                reason: "broken value".to_string(),
            });
        }
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}

/// Counts `set_up` and `prepare_for_table` calls
struct Counting {
    set_up: Rc<RefCell<Vec<usize>>>,
    prepared: Rc<RefCell<Vec<String>>>,
}

impl Strategy for Counting {
    fn name(&self) -> &str {
        "Counting"
    }

    fn set_up(&mut self, _ctx: &RunContext<'_>, rules: &[Arc<Rule>]) -> Result<(), StrategyError> {
        self.set_up.borrow_mut().push(rules.len());
        Ok(())
    }

    fn prepare_for_table(
        &mut self,
        _ctx: &RunContext<'_>,
        table: &str,
        _rules: &[Arc<Rule>],
    ) -> Result<(), StrategyError> {
        self.prepared.borrow_mut().push(table.to_string());
        Ok(())
    }

    fn transform(
        &mut self,
        _ctx: &RunContext<'_>,
        value: &Value,
        _rule: &Rule,
        _row: &Row,
    ) -> Result<Vec<Value>, StrategyError> {
        Ok(vec![value.clone()])
    }

    fn is_rule_valid(&self, _rule: &Rule, _column: Option<&ColumnMeta>) -> Result<bool, StrategyError> {
        Ok(true)
    }
}

#[test]
fn test_whole_row_delete_on_null_zipcode() {
    let src = source(
        vec![visitor(1, "Smith", None), visitor(2, "Jones", Some("12345"))],
        vec![],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", None), "DeleteRow", "ZIPCODE IS NULL")];

    let report = run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "VISITOR"), vec![visitor(2, "Jones", Some("12345"))]);
    let table = report.table("VISITOR").unwrap();
    assert_eq!(table.rows_read, 2);
    assert_eq!(table.rows_written, 1);
    assert_eq!(table.deleted_by_rule, 1);
    assert!(report.summaries.iter().any(|s| s.contains("delete predicate")));
}

#[test]
fn test_pseudonymized_surnames() {
    let src = source(
        vec![
            visitor(1, "Smith", Some("1000")),
            visitor(2, "Jones", Some("2000")),
            visitor(3, "Smith", Some("3000")),
        ],
        vec![],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", Some("SURNAME")), "Pseudonymize", "")];

    run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap();

    assert_eq!(tr.rows_of("public", "VISITOR_SURNAME").len(), 2);
    let rows = dst.rows_of("public", "VISITOR");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][1], rows[2][1]);
    assert_ne!(rows[0][1], rows[1][1]);
    assert!(rows.iter().all(|r| r[1] != Value::from("Smith") && r[1] != Value::from("Jones")));
    assert_eq!(rows[1][2], Value::from("2000"));
}

#[test]
fn test_cross_product_of_independent_columns() {
    let src = source(vec![visitor(1, "Smith", Some("1000"))], vec![]);
    let dst = MemoryDatabase::new().with_table("public", "VISITOR", visitor_columns(), &[]);
    let tr = MemoryDatabase::new();
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("FanOut", Box::new(FanOut));
    let rules = vec![
        Rule::new(site("VISITOR", Some("SURNAME")), "FanOut", "2"),
        Rule::new(site("VISITOR", Some("ZIPCODE")), "FanOut", "3"),
    ];

    let report = anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR"])
        .unwrap()
        .run()
        .unwrap();

    let expected: Vec<Vec<Value>> = ["Smith-0", "Smith-1"]
        .iter()
        .flat_map(|s| {
            ["1000-0", "1000-1", "1000-2"]
                .iter()
                .map(move |z| vec![Value::Int(1), (*s).into(), (*z).into()])
        })
        .collect();
    assert_eq!(dst.rows_of("public", "VISITOR"), expected);
    assert_eq!(report.rows_written(), 6);
}

#[test]
fn test_chained_rules_compose() {
    let src = source(vec![visitor(1, "Smith", None)], vec![]);
    let dst = MemoryDatabase::new().with_table("public", "VISITOR", visitor_columns(), &[]);
    let tr = MemoryDatabase::new();
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("FanOut", Box::new(FanOut));
    let rules = vec![
        Rule::new(site("VISITOR", Some("SURNAME")), "FanOut", "2"),
        Rule::new(site("VISITOR", Some("SURNAME")), "FanOut", "2"),
    ];

    anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR"])
        .unwrap()
        .run()
        .unwrap();

    let surnames: Vec<Value> = dst.rows_of("public", "VISITOR").into_iter().map(|r| r[1].clone()).collect();
    assert_eq!(
        surnames,
        vec![
            Value::from("Smith-0-0"),
            Value::from("Smith-0-1"),
            Value::from("Smith-1-0"),
            Value::from("Smith-1-1"),
        ]
    );
}

#[test]
fn test_cascade_deletes_children_unless_retained() {
    let src = source(
        vec![visitor(1, "Smith", None), visitor(2, "Jones", Some("12345"))],
        vec![order(10, 1, 5), order(11, 2, 6), order(12, 1, 7)],
    );
    let dst = destination();
    let tr = MemoryDatabase::new()
        .with_table(
            "public",
            "ORDERS_RETAINED",
            vec![ColumnMeta::new("NR", "integer").not_null()],
            &["NR"],
        )
        .with_rows("public", "ORDERS_RETAINED", vec![vec![Value::Int(12)]]);
    let rules = vec![Rule::new(site("VISITOR", None), "DeleteRow", "ZIPCODE IS NULL")];

    let report = run(&src, &dst, &tr, rules, &["VISITOR", "ORDERS"]).unwrap();

    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(11, 2, 6), order(12, 1, 7)]);
    let orders = report.table("ORDERS").unwrap();
    assert_eq!(orders.deleted_by_cascade, 1);
    assert_eq!(orders.retention_overrides, 1);
    assert_eq!(orders.rows_written, 2);
}

#[test]
fn test_cascade_follows_pseudonymized_keys() {
    let src = source(
        vec![visitor(1, "Smith", Some("1000")), visitor(2, "Jones", Some("2000"))],
        vec![order(10, 1, 5), order(11, 2, 6)],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![
        Rule::new(site("VISITOR", Some("ID")), "Pseudonymize", "")
            .with_dependants([site("ORDERS", Some("VISITOR_ID"))]),
        Rule::new(site("VISITOR", None), "DeleteRow", "SURNAME = 'Smith'"),
    ];

    let report = run(&src, &dst, &tr, rules, &["VISITOR", "ORDERS"]).unwrap();

    let visitors = dst.rows_of("public", "VISITOR");
    let orders = dst.rows_of("public", "ORDERS");
    assert_eq!(visitors.len(), 1);
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0][1], visitors[0][0]);
    assert_eq!(report.table("ORDERS").unwrap().deleted_by_cascade, 1);
}

#[test]
fn test_children_listed_first_are_not_cascaded() {
    let src = source(
        vec![visitor(1, "Smith", None)],
        vec![order(10, 1, 5)],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", None), "DeleteRow", "ZIPCODE IS NULL")];

    run(&src, &dst, &tr, rules, &["ORDERS", "VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 5)]);
    assert!(dst.rows_of("public", "VISITOR").is_empty());
}

#[test]
fn test_retained_row_survives_rule_deletion() {
    let src = source(
        vec![visitor(1, "Smith", None), visitor(2, "Jones", None)],
        vec![],
    );
    let dst = destination();
    let tr = MemoryDatabase::new()
        .with_table(
            "public",
            "VISITOR_RETAINED",
            vec![ColumnMeta::new("ID", "integer").not_null()],
            &["ID"],
        )
        .with_rows("public", "VISITOR_RETAINED", vec![vec![Value::Int(1)]]);
    let rules = vec![
        Rule::new(site("VISITOR", Some("SURNAME")), "SetDefault", "Doe"),
        Rule::new(site("VISITOR", Some("SURNAME")), "DeleteRow", "ZIPCODE IS NULL"),
    ];

    let report = run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "VISITOR"), vec![visitor(1, "Doe", None)]);
    let table = report.table("VISITOR").unwrap();
    assert_eq!(table.retention_overrides, 1);
    assert_eq!(table.deleted_by_rule, 1);
}

#[test]
fn test_marks_from_an_earlier_run_rescue_children() {
    let src = source(
        vec![visitor(1, "Smith", None)],
        vec![order(10, 1, 500), order(11, 1, 5)],
    );
    let tr = MemoryDatabase::new();

    let rules = vec![Rule::new(site("ORDERS", None), "Retain", "AMOUNT >= 100")];
    let report = run(&src, &destination(), &tr, rules, &["ORDERS"]).unwrap();
    assert_eq!(tr.rows_of("public", "ORDERS_RETAINED"), vec![vec![Value::Int(10)]]);
    assert!(report.summaries.contains(&"1 rows marked as retained".to_string()));

    let dst = destination();
    let rules = vec![Rule::new(site("VISITOR", None), "DeleteRow", "ZIPCODE IS NULL")];
    run(&src, &dst, &tr, rules, &["VISITOR", "ORDERS"]).unwrap();
    assert!(dst.rows_of("public", "VISITOR").is_empty());
    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 500)]);
}

#[test]
fn test_whole_row_rules_run_first() {
    let src = source(
        vec![visitor(1, "Smith", None), visitor(2, "Jones", None)],
        vec![],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("Record", Box::new(Recorder(Rc::clone(&seen))));
    let rules = vec![
        Rule::new(site("VISITOR", Some("SURNAME")), "Record", ""),
        Rule::new(site("VISITOR", None), "Record", ""),
    ];

    anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR"])
        .unwrap()
        .run()
        .unwrap();

    let row = ["public.VISITOR".to_string(), "public.VISITOR.SURNAME".to_string()];
    assert_eq!(*seen.borrow(), [row.clone(), row].concat());
}

#[test]
fn test_rerun_is_reproducible() {
    let visitors: Vec<Vec<Value>> = (1..=20)
        .map(|i| {
            let zipcode = (1000 + i).to_string();
            visitor(i, if i % 3 == 0 { "Smith" } else { "Jones" }, Some(zipcode.as_str()))
        })
        .collect();
    let src = source(visitors, vec![]);
    let tr = MemoryDatabase::new();
    let rules = || {
        vec![
            Rule::new(site("VISITOR", Some("SURNAME")), "Pseudonymize", "v_"),
            Rule::new(site("VISITOR", Some("ZIPCODE")), "Character", "PPKK"),
            Rule::new(site("VISITOR", None), "DeleteRow", "ID > 15"),
        ]
    };

    let first = destination();
    run(&src, &first, &tr, rules(), &["VISITOR"]).unwrap();
    let mapping = tr.rows_of("public", "VISITOR_SURNAME");

    let second = destination();
    let ctx = RunContext::new(
        "public",
        Endpoints {
            source: &src,
            destination: &second,
            transformation: &tr,
        },
        None,
    );
    Anonymizer::new(ctx, StrategyRegistry::with_defaults(), rules(), vec!["VISITOR".to_string()])
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(first.rows_of("public", "VISITOR").len(), 15);
    assert_eq!(first.rows_of("public", "VISITOR"), second.rows_of("public", "VISITOR"));
    assert_eq!(tr.rows_of("public", "VISITOR_SURNAME"), mapping);
}

#[test]
fn test_batches_commit_every_batch_size_rows() {
    let visitors = (1..=5).map(|i| visitor(i, "Smith", None)).collect();
    let src = source(visitors, vec![]);
    let (dst, tr) = (destination(), MemoryDatabase::new());

    let report = anonymizer(&src, &dst, &tr, StrategyRegistry::with_defaults(), vec![], &["VISITOR"])
        .unwrap()
        .with_batch_size(2)
        .run()
        .unwrap();

    assert_eq!(report.rows_written(), 5);
    assert_eq!(dst.commits(), 3);
    assert!(dst.referential_integrity());
}

#[test]
fn test_failed_batch_is_logged_and_skipped() {
    let src = source(
        vec![visitor(1, "Smith", None), visitor(2, "Jones", None)],
        vec![order(10, 1, 5)],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    dst.fail_inserts_into("VISITOR");

    let report = run(&src, &dst, &tr, vec![], &["VISITOR", "ORDERS"]).unwrap();

    assert_eq!(report.table("VISITOR").unwrap().failed_batches, 1);
    assert_eq!(report.failed_batches(), 1);
    assert!(dst.rows_of("public", "VISITOR").is_empty());
    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 5)]);
    assert!(dst.rollbacks() >= 1);
}

#[test]
fn test_failed_row_is_skipped_and_the_rest_written() {
    let src = source(
        vec![
            visitor(1, "Smith", Some("1000")),
            visitor(2, "Jones", Some("2000")),
            visitor(3, "Brown", Some("3000")),
        ],
        vec![order(10, 1, 5), order(11, 3, 7)],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("Faulty", Box::new(Faulty));
    let rules = vec![Rule::new(site("VISITOR", Some("SURNAME")), "Faulty", "")];

    let report = anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR", "ORDERS"])
        .unwrap()
        .run()
        .unwrap();

    let visitors = report.table("VISITOR").unwrap();
    assert_eq!(visitors.rows_read, 3);
    assert_eq!(visitors.failed_rows, 1);
    assert_eq!(visitors.failed_batches, 0);
    assert_eq!(visitors.rows_written, 2);
    assert_eq!(
        dst.rows_of("public", "VISITOR"),
        vec![visitor(1, "Smith", Some("1000")), visitor(3, "Brown", Some("3000"))]
    );
    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 5), order(11, 3, 7)]);
}

#[test]
fn test_missing_pseudonym_empties_text_columns() {
    let src = source(
        vec![visitor(1, "Smith", Some("1000")), visitor(2, "Jones", Some("2000"))],
        vec![],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("Unmapped", Box::new(Unmapped));
    let rules = vec![Rule::new(site("VISITOR", Some("SURNAME")), "Unmapped", "")];

    let report = anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR"])
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(
        dst.rows_of("public", "VISITOR"),
        vec![visitor(1, "Smith", Some("1000")), visitor(2, "", Some("2000"))]
    );
    assert_eq!(report.table("VISITOR").unwrap().failed_rows, 0);
}

#[test]
fn test_missing_pseudonym_fails_the_row_in_other_columns() {
    let src = source(
        vec![
            visitor(1, "Smith", Some("1000")),
            visitor(2, "Jones", Some("2000")),
            visitor(3, "Brown", None),
        ],
        vec![],
    );
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let mut registry = StrategyRegistry::with_defaults();
    registry.register("Unmapped", Box::new(Unmapped));
    let rules = vec![Rule::new(site("VISITOR", Some("ID")), "Unmapped", "")];

    let report = anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR"])
        .unwrap()
        .run()
        .unwrap();

    let table = report.table("VISITOR").unwrap();
    assert_eq!(table.failed_rows, 1);
    assert_eq!(table.failed_batches, 0);
    assert_eq!(
        dst.rows_of("public", "VISITOR"),
        vec![visitor(1, "Smith", Some("1000")), visitor(3, "Brown", None)]
    );
}

#[test]
fn test_rules_are_set_up_once_across_tables() {
    let src = source(vec![visitor(1, "Smith", None)], vec![order(10, 1, 5)]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let set_up = Rc::new(RefCell::new(Vec::new()));
    let prepared = Rc::new(RefCell::new(Vec::new()));
    let mut registry = StrategyRegistry::with_defaults();
    registry.register(
        "Counting",
        Box::new(Counting {
            set_up: Rc::clone(&set_up),
            prepared: Rc::clone(&prepared),
        }),
    );
    let key = Rule::new(site("VISITOR", Some("ID")), "Counting", "")
        .with_dependants([site("ORDERS", Some("VISITOR_ID"))]);
    let rules = vec![key.clone(), key];

    anonymizer(&src, &dst, &tr, registry, rules, &["VISITOR", "ORDERS"])
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(*set_up.borrow(), vec![2]);
    assert_eq!(*prepared.borrow(), vec!["VISITOR".to_string(), "ORDERS".to_string()]);
    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 5)]);
}

#[test]
fn test_destination_is_truncated_first() {
    let src = source(vec![visitor(1, "Smith", None)], vec![]);
    let dst = destination().with_rows("public", "VISITOR", vec![visitor(9, "Stale", None)]);
    let tr = MemoryDatabase::new();

    run(&src, &dst, &tr, vec![], &["VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "VISITOR"), vec![visitor(1, "Smith", None)]);
}

#[test]
fn test_missing_destination_table_aborts() {
    let src = source(vec![visitor(1, "Smith", None)], vec![]);
    let dst = MemoryDatabase::new()
        .with_table("public", "VISITOR", visitor_columns(), &["ID"])
        .with_rows("public", "VISITOR", vec![visitor(9, "Stale", None)]);
    let tr = MemoryDatabase::new();

    let err = run(&src, &dst, &tr, vec![], &["VISITOR", "ORDERS"]).unwrap_err();

    assert!(matches!(err, AnonymizerError::MissingDestinationTables(ref t) if t == &["ORDERS".to_string()]));
    assert_eq!(dst.rows_of("public", "VISITOR"), vec![visitor(9, "Stale", None)]);
}

#[test]
fn test_unknown_strategy_is_rejected() {
    let src = source(vec![], vec![]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", Some("SURNAME")), "Scramble", "")];

    let err = anonymizer(&src, &dst, &tr, StrategyRegistry::with_defaults(), rules, &["VISITOR"])
        .err()
        .unwrap();

    assert!(matches!(err, AnonymizerError::UnknownStrategy { ref strategy, .. } if strategy == "Scramble"));
}

#[test]
fn test_setup_failure_aborts() {
    let src = source(vec![visitor(1, "Smith", None)], vec![]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    tr.fail_inserts_into("VISITOR_SURNAME");
    let rules = vec![Rule::new(site("VISITOR", Some("SURNAME")), "Pseudonymize", "")];

    let err = run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap_err();

    match err {
        AnonymizerError::Setup { table, strategy, source } => {
            assert_eq!(table, "VISITOR");
            assert_eq!(strategy, "Pseudonymize");
            assert!(matches!(source, StrategyError::TransformationTableCreationFailed { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(dst.referential_integrity());
}

#[test]
fn test_retention_mark_failure_aborts() {
    let src = source(vec![visitor(1, "Smith", None)], vec![]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    tr.fail_inserts_into("VISITOR_RETAINED");
    let rules = vec![Rule::new(site("VISITOR", None), "Retain", "ID = 1")];

    let err = run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap_err();

    assert!(matches!(err, AnonymizerError::RetentionMarkFailed { .. }));
    assert!(dst.referential_integrity());
}

#[test]
fn test_foreign_key_scan_failure_is_not_fatal() {
    let src = source(vec![visitor(1, "Smith", None)], vec![order(10, 1, 5)]);
    src.fail_foreign_key_scan();
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", None), "DeleteRow", "ZIPCODE IS NULL")];

    run(&src, &dst, &tr, rules, &["VISITOR", "ORDERS"]).unwrap();

    assert!(dst.rows_of("public", "VISITOR").is_empty());
    assert_eq!(dst.rows_of("public", "ORDERS"), vec![order(10, 1, 5)]);
}

#[test]
fn test_rules_outside_the_scope_are_ignored() {
    let src = source(vec![visitor(1, "Smith", None)], vec![order(10, 1, 5)]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("ORDERS", None), "DeleteRow", "NR = 10")];

    run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "VISITOR"), vec![visitor(1, "Smith", None)]);
    assert!(dst.rows_of("public", "ORDERS").is_empty());
}

#[test]
fn test_uniform_distribution_summary() {
    let visitors = vec![
        visitor(1, "a", Some("1000")),
        visitor(2, "b", Some("1000")),
        visitor(3, "c", Some("2000")),
    ];
    let src = source(visitors, vec![]);
    let (dst, tr) = (destination(), MemoryDatabase::new());
    let rules = vec![Rule::new(site("VISITOR", Some("ZIPCODE")), "UniformDistribution", "")];

    let report = run(&src, &dst, &tr, rules, &["VISITOR"]).unwrap();

    assert_eq!(dst.rows_of("public", "VISITOR").len(), 2);
    assert!(report
        .summaries
        .contains(&"1 rows deleted by uniform distribution".to_string()));
}

#[test]
fn test_cartesian_product_of_nothing_is_one_empty_row() {
    assert_eq!(cartesian_product(&[]), vec![Vec::<Value>::new()]);
    assert!(cartesian_product(&[vec![Value::Int(1)], vec![]]).is_empty());
}
