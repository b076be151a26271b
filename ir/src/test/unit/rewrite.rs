use std::cell::RefCell;
use std::sync::Arc;

use test_case::test_case;

use crate::error::{Error, Result};
use crate::function::Function;
use crate::graph::replace_output_update_name;
use crate::node::Node;
use crate::ops::{Add, Constant, Convert, Multiply, Subtract};
use crate::pattern::{Match, Matcher, NPat, custom, type_matches};
use crate::registry::OpRegistry;
use crate::rewrite::{FunctionPass, GraphRewrite, PassManager, RewriteConfig};
use crate::tensor::Tensor;
use crate::test::{function, param, scalar};
use crate::DType;

fn scalar_equal_to(value: f64) -> Matcher {
    let constant = NPat::wrap_type::<Constant>(vec![]).with_predicate(custom("scalar", move |output| {
        output.node().constant_value().and_then(|t| t.scalar_value()) == Some(value)
    }));
    Matcher::new("multiply by one", NPat::wrap_type::<Multiply>(vec![NPat::label("data"), constant])).unwrap()
}

/// Replace `x * 1` with `x`.
fn drop_multiply(_: &mut (), found: &Match) -> Result<bool> {
    let data = found.get("data").unwrap();
    replace_output_update_name(found.root(), data)
}

#[test]
fn test_multiply_by_one_is_removed() {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[3]);
    let one = scalar(DType::Float32, 1.0);
    let mul = Node::new(Multiply, [data.output(0).unwrap(), one.output(0).unwrap()]).unwrap();
    let convert = Node::new(Convert::new(DType::Float16), [mul.output(0).unwrap()]).unwrap();
    let f = function(&convert, &[data]);
    drop(mul);

    let input = vec![Tensor::new(DType::Float32, &[3], vec![0.5, -1.0, 7.25]).unwrap()];
    let before = f.evaluate(&input).unwrap();

    let mut rewrite: GraphRewrite<'_, ()> = GraphRewrite::new("cleanup", &registry);
    rewrite.add_matcher(scalar_equal_to(1.0), drop_multiply).unwrap();
    assert!(rewrite.run(&f, &mut ()).unwrap());

    assert_eq!(f.count_ops_of::<Multiply>(), 0);
    assert_eq!(f.evaluate(&input).unwrap(), before);
    // Nothing left to do.
    assert!(!rewrite.run(&f, &mut ()).unwrap());
}

#[test]
fn test_pattern_kinds_must_be_registered() {
    let registry = OpRegistry::new();
    let mut rewrite: GraphRewrite<'_, ()> = GraphRewrite::new("empty", &registry);
    let err = rewrite.add_matcher(scalar_equal_to(1.0), drop_multiply).unwrap_err();
    assert!(matches!(err, Error::UnregisteredPatternKind { kind, .. } if kind.name == "Multiply"));
    assert!(rewrite.is_empty());
}

#[derive(Default)]
struct Hits {
    first: usize,
    second: usize,
}

fn hit_counting(first_result: bool) -> Hits {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[3]);
    let convert = Node::new(Convert::new(DType::Float16), [data.output(0).unwrap()]).unwrap();
    let f = function(&convert, &[data]);

    let any_convert = || Matcher::new("convert", NPat::wrap_type::<Convert>(vec![])).unwrap();
    let mut rewrite: GraphRewrite<'_, Hits> =
        GraphRewrite::new("hits", &registry).with_config(RewriteConfig::single_pass());
    rewrite
        .add_matcher(any_convert(), move |hits, _| {
            hits.first += 1;
            Ok(first_result)
        })
        .unwrap();
    rewrite
        .add_matcher(any_convert(), |hits, _| {
            hits.second += 1;
            Ok(false)
        })
        .unwrap();

    let mut hits = Hits::default();
    rewrite.run(&f, &mut hits).unwrap();
    hits
}

#[test]
fn test_first_applied_callback_ends_the_turn() {
    let hits = hit_counting(true);
    assert_eq!((hits.first, hits.second), (1, 0));
}

#[test]
fn test_declined_callback_falls_through() {
    let hits = hit_counting(false);
    assert_eq!((hits.first, hits.second), (1, 1));
}

#[test]
fn test_single_pass_visits_created_nodes() {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[2]);
    let zero = scalar(DType::Float32, 0.0);
    let sub = Node::new(Subtract, [data.output(0).unwrap(), zero.output(0).unwrap()]).unwrap();
    let f = function(&sub, &[data]);
    drop(sub);

    let mut rewrite: GraphRewrite<'_, Vec<&'static str>> =
        GraphRewrite::new("chain", &registry).with_config(RewriteConfig::single_pass());
    // x - 0 becomes x * 1 ...
    let subtract = NPat::wrap_type::<Subtract>(vec![NPat::label("data")]);
    rewrite
        .add_matcher(Matcher::new("subtract", subtract).unwrap(), |log, found| {
            let data = found.get("data").unwrap();
            let one = scalar(DType::Float32, 1.0);
            let mul = Node::new(Multiply, [data.clone(), one.output(0).unwrap()])?;
            found.root().replace(&mul.output(0)?)?;
            log.push("subtract");
            Ok(true)
        })
        .unwrap();
    // ... which is visited in the same sweep and removed.
    rewrite
        .add_matcher(scalar_equal_to(1.0), |log, found| {
            found.root().replace(found.get("data").unwrap())?;
            log.push("multiply");
            Ok(true)
        })
        .unwrap();

    let mut log = Vec::new();
    assert!(rewrite.run(&f, &mut log).unwrap());
    assert_eq!(log, vec!["subtract", "multiply"]);
    assert_eq!(f.ops_count(), 2);
}

#[test]
fn test_detached_nodes_are_not_visited() {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[2]);
    let down = Node::new(Convert::new(DType::Float16), [data.output(0).unwrap()]).unwrap();
    let up = Node::new(Convert::new(DType::Float32), [down.output(0).unwrap()]).unwrap();
    down.set_friendly_name("down");
    up.set_friendly_name("up");
    let f = function(&up, &[data]);

    let mut rewrite: GraphRewrite<'_, Vec<String>> = GraphRewrite::new("detach", &registry);
    // Bypass the Convert consuming an f16 Convert. `up` stays allocated
    // through the handle held here.
    let to_half = NPat::wrap_type::<Convert>(vec![]).with_predicate(type_matches(DType::Float16));
    rewrite
        .add_matcher(Matcher::new("bypass consumer", to_half).unwrap(), |_, found| {
            let consumer = found.root().consumers().into_iter().find(|input| input.node().is::<Convert>());
            let Some(consumer) = consumer else {
                return Ok(false);
            };
            consumer.node().output(0)?.replace(found.root())?;
            Ok(true)
        })
        .unwrap();
    rewrite
        .add_matcher(Matcher::new("record", NPat::wrap_type::<Convert>(vec![])).unwrap(), |visited, found| {
            visited.push(found.root_node().friendly_name());
            Ok(false)
        })
        .unwrap();

    let mut visited = Vec::new();
    assert!(rewrite.run(&f, &mut visited).unwrap());
    assert_eq!(visited, vec!["down".to_string()]);
    assert!(!f.contains(&up));
    assert_eq!(Arc::strong_count(&up), 1);
}

#[test]
fn test_visit_limit_is_enforced() {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[2]);
    let convert = Node::new(Convert::new(DType::Float16), [data.output(0).unwrap()]).unwrap();
    let f = function(&convert, &[data]);

    let config = RewriteConfig::builder().max_visits(5).build();
    let mut rewrite: GraphRewrite<'_, ()> = GraphRewrite::new("spin", &registry).with_config(config);
    // Claims a change without making one, so every sweep repeats.
    rewrite.add_matcher(Matcher::new("convert", NPat::wrap_type::<Convert>(vec![])).unwrap(), |_, _| Ok(true)).unwrap();

    let err = rewrite.run(&f, &mut ()).unwrap_err();
    assert_eq!(err, Error::RewriteLimitExceeded { visits: 6 });
}

struct Recorder<'a> {
    name: &'static str,
    changes: bool,
    log: &'a RefCell<Vec<&'static str>>,
}

impl FunctionPass for Recorder<'_> {
    fn name(&self) -> &str {
        self.name
    }

    fn run_on_function(&self, _: &Function) -> Result<bool> {
        self.log.borrow_mut().push(self.name);
        Ok(self.changes)
    }
}

#[test]
fn test_pass_manager_runs_in_order() {
    let data = param(DType::Float32, &[2]);
    let f = function(&data, &[data.clone()]);
    let log = RefCell::new(Vec::new());

    let manager: PassManager<'_> = PassManager::new()
        .add(Recorder { name: "first", changes: false, log: &log })
        .add(Recorder { name: "second", changes: true, log: &log });
    assert_eq!(manager.names(), vec!["first", "second"]);
    assert!(manager.run(&f).unwrap());
    assert_eq!(*log.borrow(), vec!["first", "second"]);

    let quiet: PassManager<'_> = PassManager::new().add(Recorder { name: "only", changes: false, log: &log });
    assert!(!quiet.run(&f).unwrap());
}

#[test]
fn test_graph_rewrite_is_a_function_pass() {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[3]);
    let one = scalar(DType::Float32, 1.0);
    let mul = Node::new(Multiply, [data.output(0).unwrap(), one.output(0).unwrap()]).unwrap();
    let convert = Node::new(Convert::new(DType::Float16), [mul.output(0).unwrap()]).unwrap();
    let f = function(&convert, &[data]);
    drop(mul);

    let mut rewrite: GraphRewrite<'_, ()> = GraphRewrite::new("cleanup", &registry);
    rewrite.add_matcher(scalar_equal_to(1.0), drop_multiply).unwrap();
    let manager: PassManager<'_> = PassManager::new().add(rewrite);
    assert!(manager.run(&f).unwrap());
    assert_eq!(f.count_ops_of::<Multiply>(), 0);
}

#[test_case(true, vec!["convert", "add"] ; "types rederived after each rewrite")]
#[test_case(false, vec!["convert"] ; "stale types without revalidation")]
fn test_rewrite_revalidation_within_a_sweep(revalidate: bool, expected: Vec<&'static str>) {
    let registry = OpRegistry::opset1();
    let data = param(DType::Float32, &[2]);
    let narrow = Node::new(Convert::new(DType::Float16), [data.output(0).unwrap()]).unwrap();
    let sum = Node::new(Add, [narrow.output(0).unwrap(), narrow.output(0).unwrap()]).unwrap();
    let f = function(&sum, &[data]);
    drop((narrow, sum));

    let config = RewriteConfig { revalidate, ..RewriteConfig::single_pass() };
    let mut rewrite: GraphRewrite<'_, Vec<&'static str>> = GraphRewrite::new("widen", &registry).with_config(config);
    let half = NPat::wrap_type::<Convert>(vec![NPat::label("data")]).with_predicate(type_matches(DType::Float16));
    rewrite
        .add_matcher(Matcher::new("widen convert", half).unwrap(), |log, found| {
            let wide = Node::new(Convert::new(DType::Float64), [found.get("data").unwrap().clone()])?;
            found.root().replace(&wide.output(0)?)?;
            log.push("convert");
            Ok(true)
        })
        .unwrap();
    let wide_sum = NPat::wrap_type::<Add>(vec![]).with_predicate(type_matches(DType::Float64));
    rewrite
        .add_matcher(Matcher::new("wide add", wide_sum).unwrap(), |log, _| {
            log.push("add");
            Ok(false)
        })
        .unwrap();

    let mut log = Vec::new();
    assert!(rewrite.run(&f, &mut log).unwrap());
    assert_eq!(log, expected);
}
