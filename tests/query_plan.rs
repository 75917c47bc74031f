use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quiver::query::eval::{BinaryOp, Expression};
use quiver::query::plan::{
    AggregateElement, AggregationOp, Direction, ExpansionLambda, LogicalOperator, NamedExpression,
    RangeBound, SortDirection, SortItem, VariableExpandMode,
};
use quiver::query::{ExecutionContext, Frame, ProcedureRegistry, QueryValue, Symbol, SymbolTable};
use quiver::{Accessor, Config, PropertyValue, QueryError, QueryResult, Storage, View};

fn open() -> Arc<Storage> {
    Storage::open(Config::in_memory()).expect("in-memory open cannot fail")
}

fn run(
    plan: &LogicalOperator,
    symbols: &SymbolTable,
    ctx: &ExecutionContext<'_>,
    collect: &[Symbol],
) -> QueryResult<Vec<Vec<QueryValue>>> {
    let mut cursor = plan.make_cursor();
    let mut frame = Frame::new(symbols.len());
    let mut rows = Vec::new();
    loop {
        match cursor.pull(&mut frame, ctx) {
            Ok(true) => rows.push(collect.iter().map(|symbol| frame.get(*symbol).clone()).collect()),
            Ok(false) => break,
            Err(err) => {
                cursor.shutdown();
                return Err(err);
            }
        }
    }
    cursor.shutdown();
    Ok(rows)
}

fn as_int(value: &QueryValue) -> i64 {
    match value {
        QueryValue::Int(value) => *value,
        other => panic!("expected an int, got {other:?}"),
    }
}

fn prop(symbol: Symbol, name: &str) -> Expression {
    Expression::property(Expression::ident(symbol), name)
}

fn scan_all(input: LogicalOperator, symbol: Symbol) -> LogicalOperator {
    LogicalOperator::ScanAll {
        input: Box::new(input),
        output_symbol: symbol,
        view: View::Old,
    }
}

fn scan_by_id(input: LogicalOperator, symbol: Symbol, id: i64) -> LogicalOperator {
    LogicalOperator::ScanAllById {
        input: Box::new(input),
        output_symbol: symbol,
        expression: Expression::literal(id),
        view: View::Old,
    }
}

fn produce(input: LogicalOperator, items: Vec<(&str, Expression, Symbol)>) -> LogicalOperator {
    LogicalOperator::Produce {
        input: Box::new(input),
        named_expressions: items
            .into_iter()
            .map(|(name, expression, symbol)| NamedExpression {
                name: name.to_owned(),
                expression,
                symbol,
            })
            .collect(),
    }
}

/// `CREATE ({x:0})-[:T]->({x:0})`
fn create_pair_with_x(accessor: &Accessor) {
    let v1 = accessor.create_vertex().unwrap();
    let v2 = accessor.create_vertex().unwrap();
    let x = accessor.property_id("x");
    v1.set_property(x, PropertyValue::Int(0)).unwrap();
    v2.set_property(x, PropertyValue::Int(0)).unwrap();
    let t = accessor.edge_type_id("T");
    accessor.create_edge(&v1, &v2, t).unwrap();
}

#[test]
fn set_property_with_and_without_accumulate() {
    // MATCH (n)--(m) SET n.x = n.x + 1, m.x = m.x + 1 RETURN n.x, m.x
    let check = |accumulate: bool| {
        let storage = open();
        let setup = storage.access();
        create_pair_with_x(&setup);
        setup.commit().unwrap();

        let accessor = storage.access();
        let ctx = ExecutionContext::new(&accessor);
        let mut symbols = SymbolTable::new();
        let n = symbols.declare("n");
        let m = symbols.declare("m");
        let r = symbols.declare("r");
        let n_x = symbols.declare("n.x");
        let m_x = symbols.declare("m.x");

        let add_one = |symbol| {
            Expression::binary(BinaryOp::Add, prop(symbol, "x"), Expression::literal(1i64))
        };
        let mut plan = LogicalOperator::Expand {
            input: Box::new(scan_all(LogicalOperator::Once, n)),
            input_symbol: n,
            node_symbol: m,
            edge_symbol: r,
            direction: Direction::Both,
            edge_types: Vec::new(),
            existing_node: false,
            view: View::Old,
        };
        plan = LogicalOperator::SetProperty {
            input: Box::new(plan),
            object: Expression::ident(n),
            property: "x".to_owned(),
            value: add_one(n),
        };
        plan = LogicalOperator::SetProperty {
            input: Box::new(plan),
            object: Expression::ident(m),
            property: "x".to_owned(),
            value: add_one(m),
        };
        if accumulate {
            plan = LogicalOperator::Accumulate {
                input: Box::new(plan),
                symbols: vec![n, m],
                advance_command: false,
            };
        }
        let plan = produce(plan, vec![("n.x", prop(n, "x"), n_x), ("m.x", prop(m, "x"), m_x)]);

        let rows = run(&plan, &symbols, &ctx, &[n_x, m_x]).unwrap();
        let values: Vec<i64> = rows.iter().flatten().map(as_int).collect();
        if accumulate {
            assert_eq!(values, vec![2, 2, 2, 2]);
        } else {
            assert_eq!(values, vec![1, 1, 2, 2]);
        }
        accessor.commit().unwrap();
    };
    check(false);
    check(true);
}

#[test]
fn accumulate_advance_command_controls_visibility() {
    // CREATE (n) WITH n MATCH (m) RETURN m needs the command advance.
    let check = |advance: bool| {
        let storage = open();
        let accessor = storage.access();
        let ctx = ExecutionContext::new(&accessor);
        let mut symbols = SymbolTable::new();
        let n = symbols.declare("n");
        let m = symbols.declare("m");
        let create = LogicalOperator::CreateNode {
            input: Box::new(LogicalOperator::Once),
            node: quiver::query::plan::NodeCreationInfo {
                symbol: n,
                labels: Vec::new(),
                properties: Vec::new(),
            },
        };
        let accumulate = LogicalOperator::Accumulate {
            input: Box::new(create),
            symbols: vec![n],
            advance_command: advance,
        };
        let plan = scan_all(accumulate, m);
        let rows = run(&plan, &symbols, &ctx, &[m]).unwrap();
        assert_eq!(rows.len(), usize::from(advance));
        accessor.abort();
    };
    check(false);
    check(true);
}

#[test]
fn bfs_finds_single_shortest_path_to_known_sink() {
    // Graph 0->1->2, 0->3, 3->2; the shortest 0->2 path has length 2.
    let storage = open();
    let setup = storage.access();
    let v: Vec<_> = (0..4).map(|_| setup.create_vertex().unwrap()).collect();
    let t = setup.edge_type_id("T");
    setup.create_edge(&v[0], &v[1], t).unwrap();
    setup.create_edge(&v[1], &v[2], t).unwrap();
    setup.create_edge(&v[0], &v[3], t).unwrap();
    setup.create_edge(&v[3], &v[2], t).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let s = symbols.declare("s");
    let sink = symbols.declare("t");
    let r = symbols.declare("r");

    let plan = LogicalOperator::ExpandVariable {
        input: Box::new(scan_by_id(scan_by_id(LogicalOperator::Once, s, 0), sink, 2)),
        input_symbol: s,
        node_symbol: sink,
        edge_symbol: r,
        direction: Direction::Out,
        edge_types: Vec::new(),
        mode: VariableExpandMode::BreadthFirst,
        lower_bound: None,
        upper_bound: None,
        existing_node: true,
        is_reverse: false,
        filter_lambda: None,
        weight_lambda: None,
        total_weight_symbol: None,
    };
    let rows = run(&plan, &symbols, &ctx, &[r]).unwrap();
    assert_eq!(rows.len(), 1);
    match &rows[0][0] {
        QueryValue::List(edges) => assert_eq!(edges.len(), 2),
        other => panic!("expected an edge list, got {other:?}"),
    }
}

#[test]
fn bfs_with_unreachable_sink_produces_nothing() {
    let storage = open();
    let setup = storage.access();
    setup.create_vertex().unwrap();
    setup.create_vertex().unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let s = symbols.declare("s");
    let sink = symbols.declare("t");
    let r = symbols.declare("r");
    let plan = LogicalOperator::ExpandVariable {
        input: Box::new(scan_by_id(scan_by_id(LogicalOperator::Once, s, 0), sink, 1)),
        input_symbol: s,
        node_symbol: sink,
        edge_symbol: r,
        direction: Direction::Out,
        edge_types: Vec::new(),
        mode: VariableExpandMode::BreadthFirst,
        lower_bound: None,
        upper_bound: None,
        existing_node: true,
        is_reverse: false,
        filter_lambda: None,
        weight_lambda: None,
        total_weight_symbol: None,
    };
    assert!(run(&plan, &symbols, &ctx, &[r]).unwrap().is_empty());
}

fn weighted_plan(
    symbols: &mut SymbolTable,
    weight_value: impl Fn(Symbol) -> Expression,
) -> (LogicalOperator, Symbol) {
    let a = symbols.declare("a");
    let b = symbols.declare("b");
    let r = symbols.declare("r");
    let inner_edge = symbols.declare("we");
    let inner_vertex = symbols.declare("wv");
    let total = symbols.declare("total");
    let plan = LogicalOperator::ExpandVariable {
        input: Box::new(scan_by_id(scan_by_id(LogicalOperator::Once, a, 0), b, 1)),
        input_symbol: a,
        node_symbol: b,
        edge_symbol: r,
        direction: Direction::Out,
        edge_types: Vec::new(),
        mode: VariableExpandMode::WeightedShortestPath,
        lower_bound: None,
        upper_bound: None,
        existing_node: true,
        is_reverse: false,
        filter_lambda: None,
        weight_lambda: Some(ExpansionLambda {
            inner_edge,
            inner_vertex,
            expression: weight_value(inner_edge),
        }),
        total_weight_symbol: Some(total),
    };
    (plan, total)
}

#[test]
fn weighted_shortest_path_takes_cheapest_route() {
    // 0->1 weight 5, 0->2 weight 1, 2->1 weight 1: cheapest 0->1 costs 2.
    let storage = open();
    let setup = storage.access();
    let v: Vec<_> = (0..3).map(|_| setup.create_vertex().unwrap()).collect();
    let t = setup.edge_type_id("T");
    let w = setup.property_id("w");
    for (from, to, weight) in [(0, 1, 5i64), (0, 2, 1), (2, 1, 1)] {
        let edge = setup.create_edge(&v[from], &v[to], t).unwrap();
        edge.set_property(w, PropertyValue::Int(weight)).unwrap();
    }
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let (plan, total) = weighted_plan(&mut symbols, |edge| prop(edge, "w"));
    let rows = run(&plan, &symbols, &ctx, &[total]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(as_int(&rows[0][0]), 2);
}

#[test]
fn weighted_shortest_path_rejects_bad_weights() {
    let check = |weight: PropertyValue| {
        let storage = open();
        let setup = storage.access();
        let a = setup.create_vertex().unwrap();
        let b = setup.create_vertex().unwrap();
        let t = setup.edge_type_id("T");
        let w = setup.property_id("w");
        let edge = setup.create_edge(&a, &b, t).unwrap();
        edge.set_property(w, weight).unwrap();
        setup.commit().unwrap();

        let accessor = storage.access();
        let ctx = ExecutionContext::new(&accessor);
        let mut symbols = SymbolTable::new();
        let (plan, total) = weighted_plan(&mut symbols, |edge| prop(edge, "w"));
        let result = run(&plan, &symbols, &ctx, &[total]);
        assert!(matches!(result, Err(QueryError::RuntimeType(_))));
    };
    check(PropertyValue::Int(-1));
    check(PropertyValue::from("heavy"));
}

#[test]
fn aggregation_over_empty_input_yields_default_row() {
    // MATCH (n) RETURN count(*), count(n.x), min(n.x), avg(n.x), collect(n.x)
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let outputs: Vec<Symbol> = (0..5)
        .map(|i| symbols.declare(&format!("agg{i}")))
        .collect();
    let ops = [
        (AggregationOp::Count, None),
        (AggregationOp::Count, Some(prop(n, "x"))),
        (AggregationOp::Min, Some(prop(n, "x"))),
        (AggregationOp::Avg, Some(prop(n, "x"))),
        (AggregationOp::CollectList, Some(prop(n, "x"))),
    ];
    let plan = LogicalOperator::Aggregate {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        aggregations: ops
            .into_iter()
            .zip(outputs.iter())
            .map(|((op, value), output)| AggregateElement {
                op,
                value,
                key: None,
                output_symbol: *output,
            })
            .collect(),
        group_by: Vec::new(),
        remember: Vec::new(),
    };
    let rows = run(&plan, &symbols, &ctx, &outputs).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(as_int(&rows[0][0]), 0);
    assert_eq!(as_int(&rows[0][1]), 0);
    assert!(rows[0][2].is_null());
    assert!(rows[0][3].is_null());
    assert!(matches!(&rows[0][4], QueryValue::List(items) if items.is_empty()));
}

#[test]
fn aggregation_with_grouping_on_empty_input_yields_no_rows() {
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let count = symbols.declare("count");
    let plan = LogicalOperator::Aggregate {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        aggregations: vec![AggregateElement {
            op: AggregationOp::Count,
            value: None,
            key: None,
            output_symbol: count,
        }],
        group_by: vec![prop(n, "x")],
        remember: Vec::new(),
    };
    assert!(run(&plan, &symbols, &ctx, &[count]).unwrap().is_empty());
}

#[test]
fn sum_rejects_non_numeric_input() {
    let storage = open();
    let setup = storage.access();
    let v = setup.create_vertex().unwrap();
    let x = setup.property_id("x");
    v.set_property(x, PropertyValue::from("nan")).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let sum = symbols.declare("sum");
    let plan = LogicalOperator::Aggregate {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        aggregations: vec![AggregateElement {
            op: AggregationOp::Sum,
            value: Some(prop(n, "x")),
            key: None,
            output_symbol: sum,
        }],
        group_by: Vec::new(),
        remember: Vec::new(),
    };
    assert!(matches!(
        run(&plan, &symbols, &ctx, &[sum]),
        Err(QueryError::RuntimeType(_))
    ));
}

#[test]
fn variable_expand_lower_zero_emits_empty_path() {
    let storage = open();
    let setup = storage.access();
    setup.create_vertex().unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let s = symbols.declare("s");
    let m = symbols.declare("m");
    let r = symbols.declare("r");
    let plan = LogicalOperator::ExpandVariable {
        input: Box::new(scan_by_id(LogicalOperator::Once, s, 0)),
        input_symbol: s,
        node_symbol: m,
        edge_symbol: r,
        direction: Direction::Out,
        edge_types: Vec::new(),
        mode: VariableExpandMode::DepthFirst,
        lower_bound: Some(Expression::literal(0i64)),
        upper_bound: Some(Expression::literal(0i64)),
        existing_node: false,
        is_reverse: false,
        filter_lambda: None,
        weight_lambda: None,
        total_weight_symbol: None,
    };
    let rows = run(&plan, &symbols, &ctx, &[r, m]).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(matches!(&rows[0][0], QueryValue::List(edges) if edges.is_empty()));
    assert!(matches!(&rows[0][1], QueryValue::Vertex(vertex) if vertex.gid().0 == 0));
}

#[test]
fn variable_expand_respects_bounds_and_uniqueness() {
    // A triangle: 0->1->2->0. Paths from 0 of length 1..=3 along OUT.
    let storage = open();
    let setup = storage.access();
    let v: Vec<_> = (0..3).map(|_| setup.create_vertex().unwrap()).collect();
    let t = setup.edge_type_id("T");
    setup.create_edge(&v[0], &v[1], t).unwrap();
    setup.create_edge(&v[1], &v[2], t).unwrap();
    setup.create_edge(&v[2], &v[0], t).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let s = symbols.declare("s");
    let m = symbols.declare("m");
    let r = symbols.declare("r");
    let plan = LogicalOperator::ExpandVariable {
        input: Box::new(scan_by_id(LogicalOperator::Once, s, 0)),
        input_symbol: s,
        node_symbol: m,
        edge_symbol: r,
        direction: Direction::Out,
        edge_types: Vec::new(),
        mode: VariableExpandMode::DepthFirst,
        lower_bound: Some(Expression::literal(1i64)),
        upper_bound: Some(Expression::literal(10i64)),
        existing_node: false,
        is_reverse: false,
        filter_lambda: None,
        weight_lambda: None,
        total_weight_symbol: None,
    };
    let rows = run(&plan, &symbols, &ctx, &[r]).unwrap();
    // Edge uniqueness caps the walk at the triangle's three edges.
    assert_eq!(rows.len(), 3);
    let mut lengths: Vec<usize> = rows
        .iter()
        .map(|row| match &row[0] {
            QueryValue::List(edges) => edges.len(),
            other => panic!("expected an edge list, got {other:?}"),
        })
        .collect();
    lengths.sort();
    assert_eq!(lengths, vec![1, 2, 3]);
}

#[test]
fn range_scan_with_null_bounds_is_empty() {
    let storage = open();
    let setup = storage.access();
    let label = setup.label_id("Item");
    let price = setup.property_id("price");
    let vertex = setup.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    vertex.set_property(price, PropertyValue::Int(5)).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let plan = LogicalOperator::ScanAllByLabelPropertyRange {
        input: Box::new(LogicalOperator::Once),
        output_symbol: n,
        label: "Item".to_owned(),
        property: "price".to_owned(),
        lower: Some(RangeBound {
            expression: Expression::Literal(PropertyValue::Null),
            inclusive: true,
        }),
        upper: Some(RangeBound {
            expression: Expression::Literal(PropertyValue::Null),
            inclusive: true,
        }),
        view: View::Old,
    };
    assert!(run(&plan, &symbols, &ctx, &[n]).unwrap().is_empty());
}

#[test]
fn range_scan_rejects_unordered_bound_types() {
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let plan = LogicalOperator::ScanAllByLabelPropertyRange {
        input: Box::new(LogicalOperator::Once),
        output_symbol: n,
        label: "Item".to_owned(),
        property: "price".to_owned(),
        lower: Some(RangeBound {
            expression: Expression::literal(true),
            inclusive: true,
        }),
        upper: None,
        view: View::Old,
    };
    assert!(matches!(
        run(&plan, &symbols, &ctx, &[n]),
        Err(QueryError::RangeBound("Bool"))
    ));
}

#[test]
fn filter_treats_null_as_false_and_rejects_non_bool() {
    let storage = open();
    let setup = storage.access();
    setup.create_vertex().unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");

    let null_filter = LogicalOperator::Filter {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expression: Expression::Literal(PropertyValue::Null),
    };
    assert!(run(&null_filter, &symbols, &ctx, &[n]).unwrap().is_empty());

    let bad_filter = LogicalOperator::Filter {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expression: Expression::literal(1i64),
    };
    assert!(matches!(
        run(&bad_filter, &symbols, &ctx, &[n]),
        Err(QueryError::RuntimeType(_))
    ));
}

#[test]
fn skip_and_limit_page_through_results() {
    let storage = open();
    let setup = storage.access();
    for _ in 0..5 {
        setup.create_vertex().unwrap();
    }
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");

    let skip = LogicalOperator::Skip {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expression: Expression::literal(2i64),
    };
    assert_eq!(run(&skip, &symbols, &ctx, &[n]).unwrap().len(), 3);

    let limit = LogicalOperator::Limit {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expression: Expression::literal(2i64),
    };
    assert_eq!(run(&limit, &symbols, &ctx, &[n]).unwrap().len(), 2);

    let negative = LogicalOperator::Limit {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expression: Expression::literal(-1i64),
    };
    assert!(matches!(
        run(&negative, &symbols, &ctx, &[n]),
        Err(QueryError::RuntimeType(_))
    ));
}

#[test]
fn order_by_sorts_with_nulls_first() {
    let storage = open();
    let setup = storage.access();
    let x = setup.property_id("x");
    for value in [3i64, 1, 2] {
        let vertex = setup.create_vertex().unwrap();
        vertex.set_property(x, PropertyValue::Int(value)).unwrap();
    }
    setup.create_vertex().unwrap(); // no x property
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let out = symbols.declare("out");

    let plan = produce(
        LogicalOperator::OrderBy {
            input: Box::new(scan_all(LogicalOperator::Once, n)),
            order_by: vec![SortItem {
                direction: SortDirection::Ascending,
                expression: prop(n, "x"),
            }],
            output_symbols: vec![n],
        },
        vec![("x", prop(n, "x"), out)],
    );
    let rows = run(&plan, &symbols, &ctx, &[out]).unwrap();
    assert!(rows[0][0].is_null());
    let sorted: Vec<i64> = rows[1..].iter().map(|row| as_int(&row[0])).collect();
    assert_eq!(sorted, vec![1, 2, 3]);
}

#[test]
fn unwind_distinct_union_cartesian() {
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let l = symbols.declare("l");
    let r = symbols.declare("r");
    let u = symbols.declare("u");

    let unwind = |values: Vec<i64>, symbol| LogicalOperator::Unwind {
        input: Box::new(LogicalOperator::Once),
        expression: Expression::Literal(PropertyValue::List(
            values.into_iter().map(PropertyValue::Int).collect(),
        )),
        output_symbol: symbol,
    };

    let distinct = LogicalOperator::Distinct {
        input: Box::new(unwind(vec![1, 1, 2, 2, 3], l)),
        value_symbols: vec![l],
    };
    let rows = run(&distinct, &symbols, &ctx, &[l]).unwrap();
    assert_eq!(rows.iter().map(|row| as_int(&row[0])).collect::<Vec<_>>(), vec![1, 2, 3]);

    let union = LogicalOperator::Union {
        left: Box::new(unwind(vec![1, 2], l)),
        right: Box::new(unwind(vec![3], r)),
        union_symbols: vec![u],
        left_symbols: vec![l],
        right_symbols: vec![r],
    };
    let rows = run(&union, &symbols, &ctx, &[u]).unwrap();
    assert_eq!(rows.iter().map(|row| as_int(&row[0])).collect::<Vec<_>>(), vec![1, 2, 3]);

    let cartesian = LogicalOperator::Cartesian {
        left: Box::new(unwind(vec![1, 2], l)),
        right: Box::new(unwind(vec![10, 20], r)),
        left_symbols: vec![l],
        right_symbols: vec![r],
    };
    let rows = run(&cartesian, &symbols, &ctx, &[l, r]).unwrap();
    let pairs: Vec<(i64, i64)> = rows
        .iter()
        .map(|row| (as_int(&row[0]), as_int(&row[1])))
        .collect();
    assert_eq!(pairs, vec![(1, 10), (2, 10), (1, 20), (2, 20)]);
}

#[test]
fn optional_emits_nulls_when_nothing_matches() {
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let plan = LogicalOperator::Optional {
        input: Box::new(LogicalOperator::Once),
        optional: Box::new(scan_all(LogicalOperator::Once, n)),
        optional_symbols: vec![n],
    };
    let rows = run(&plan, &symbols, &ctx, &[n]).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0][0].is_null());
}

#[test]
fn merge_matches_or_creates() {
    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");

    let plan = LogicalOperator::Merge {
        input: Box::new(LogicalOperator::Once),
        merge_match: Box::new(LogicalOperator::ScanAllByLabel {
            input: Box::new(LogicalOperator::Once),
            output_symbol: n,
            label: "Thing".to_owned(),
            view: View::New,
        }),
        merge_create: Box::new(LogicalOperator::CreateNode {
            input: Box::new(LogicalOperator::Once),
            node: quiver::query::plan::NodeCreationInfo {
                symbol: n,
                labels: vec!["Thing".to_owned()],
                properties: Vec::new(),
            },
        }),
    };

    // First run creates, second run matches the created vertex.
    assert_eq!(run(&plan, &symbols, &ctx, &[n]).unwrap().len(), 1);
    assert_eq!(run(&plan, &symbols, &ctx, &[n]).unwrap().len(), 1);
    assert_eq!(accessor.vertices(View::New).count(), 1);
    accessor.commit().unwrap();
}

#[test]
fn edge_uniqueness_filter_drops_reused_edges() {
    let storage = open();
    let setup = storage.access();
    let a = setup.create_vertex().unwrap();
    let b = setup.create_vertex().unwrap();
    let t = setup.edge_type_id("T");
    setup.create_edge(&a, &b, t).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let m = symbols.declare("m");
    let k = symbols.declare("k");
    let r1 = symbols.declare("r1");
    let r2 = symbols.declare("r2");

    // (n)-[r1]-(m)-[r2]-(k): the only second step walks back over r1.
    let expand = |input, from, to, edge| LogicalOperator::Expand {
        input: Box::new(input),
        input_symbol: from,
        node_symbol: to,
        edge_symbol: edge,
        direction: Direction::Both,
        edge_types: Vec::new(),
        existing_node: false,
        view: View::Old,
    };
    let plan = LogicalOperator::EdgeUniquenessFilter {
        input: Box::new(expand(
            expand(scan_all(LogicalOperator::Once, n), n, m, r1),
            m,
            k,
            r2,
        )),
        expand_symbol: r2,
        previous_symbols: vec![r1],
    };
    assert!(run(&plan, &symbols, &ctx, &[k]).unwrap().is_empty());
}

#[test]
fn construct_named_path_follows_endpoints() {
    let storage = open();
    let setup = storage.access();
    let a = setup.create_vertex().unwrap();
    let b = setup.create_vertex().unwrap();
    let t = setup.edge_type_id("T");
    setup.create_edge(&a, &b, t).unwrap();
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let m = symbols.declare("m");
    let r = symbols.declare("r");
    let p = symbols.declare("p");

    let plan = LogicalOperator::ConstructNamedPath {
        input: Box::new(LogicalOperator::Expand {
            input: Box::new(scan_by_id(LogicalOperator::Once, n, 0)),
            input_symbol: n,
            node_symbol: m,
            edge_symbol: r,
            direction: Direction::Out,
            edge_types: Vec::new(),
            existing_node: false,
            view: View::Old,
        }),
        path_symbol: p,
        path_elements: vec![n, r, m],
    };
    let rows = run(&plan, &symbols, &ctx, &[p]).unwrap();
    assert_eq!(rows.len(), 1);
    match &rows[0][0] {
        QueryValue::Path(path) => {
            assert_eq!(path.vertices.len(), 2);
            assert_eq!(path.edges.len(), 1);
            assert_eq!(path.vertices[0].gid().0, 0);
            assert_eq!(path.vertices[1].gid().0, 1);
        }
        other => panic!("expected a path, got {other:?}"),
    }
}

#[test]
fn call_procedure_emits_rows() {
    let storage = open();
    let accessor = storage.access();
    let mut registry = ProcedureRegistry::new();
    registry.register(
        "math.double",
        Arc::new(|args: &[QueryValue]| {
            let QueryValue::Int(value) = &args[0] else {
                return Err("expected an int".to_owned());
            };
            Ok(vec![vec![QueryValue::Int(value * 2)]])
        }),
    );
    let ctx = ExecutionContext::new(&accessor).with_procedures(&registry);
    let mut symbols = SymbolTable::new();
    let out = symbols.declare("out");
    let plan = LogicalOperator::CallProcedure {
        input: Box::new(LogicalOperator::Once),
        name: "math.double".to_owned(),
        arguments: vec![Expression::literal(21i64)],
        result_symbols: vec![out],
    };
    let rows = run(&plan, &symbols, &ctx, &[out]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(as_int(&rows[0][0]), 42);

    let missing = LogicalOperator::CallProcedure {
        input: Box::new(LogicalOperator::Once),
        name: "does.not.exist".to_owned(),
        arguments: Vec::new(),
        result_symbols: vec![out],
    };
    assert!(matches!(
        run(&missing, &symbols, &ctx, &[out]),
        Err(QueryError::Procedure { .. })
    ));
}

#[test]
fn load_csv_streams_rows_as_maps() -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "name,age")?;
    writeln!(file, "ada,36")?;
    writeln!(file, "alan,41")?;
    file.flush()?;

    let storage = open();
    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let row = symbols.declare("row");
    let plan = LogicalOperator::LoadCsv {
        input: Box::new(LogicalOperator::Once),
        path: Expression::literal(file.path().to_string_lossy().into_owned()),
        with_header: true,
        delimiter: b',',
        row_symbol: row,
    };
    let rows = run(&plan, &symbols, &ctx, &[row])?;
    assert_eq!(rows.len(), 2);
    match &rows[0][0] {
        QueryValue::Map(entries) => {
            assert!(matches!(&entries["name"], QueryValue::String(name) if name == "ada"));
            assert!(matches!(&entries["age"], QueryValue::String(age) if age == "36"));
        }
        other => panic!("expected a map row, got {other:?}"),
    }
    Ok(())
}

#[test]
fn cancellation_aborts_the_pull_loop() {
    let storage = open();
    let setup = storage.access();
    for _ in 0..10 {
        setup.create_vertex().unwrap();
    }
    setup.commit().unwrap();

    let accessor = storage.access();
    let flag = Arc::new(AtomicBool::new(true));
    let ctx = ExecutionContext::new(&accessor).with_cancellation(Arc::clone(&flag));
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let plan = scan_all(LogicalOperator::Once, n);
    assert!(matches!(
        run(&plan, &symbols, &ctx, &[n]),
        Err(QueryError::Cancelled)
    ));
    flag.store(false, Ordering::Relaxed);
    assert_eq!(run(&plan, &symbols, &ctx, &[n]).unwrap().len(), 10);
}

#[test]
fn delete_with_detach_through_the_operator() {
    let storage = open();
    let setup = storage.access();
    create_pair_with_x(&setup);
    setup.commit().unwrap();

    let accessor = storage.access();
    let ctx = ExecutionContext::new(&accessor);
    let mut symbols = SymbolTable::new();
    let n = symbols.declare("n");
    let plan = LogicalOperator::Delete {
        input: Box::new(scan_all(LogicalOperator::Once, n)),
        expressions: vec![Expression::ident(n)],
        detach: true,
    };
    assert_eq!(run(&plan, &symbols, &ctx, &[n]).unwrap().len(), 2);
    assert_eq!(accessor.vertices(View::New).count(), 0);
    assert_eq!(accessor.edges(View::New).count(), 0);
    accessor.commit().unwrap();
}
