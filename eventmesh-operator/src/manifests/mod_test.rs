use anyhow::{bail, Result};

use super::*;

const DEFS: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: config-features
  namespace: knative-eventing
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: imc-dispatcher
  namespace: knative-eventing
---
apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata:
  name: broker-ingress-hpa
  namespace: knative-eventing
"#;

fn label(value: &'static str) -> Transformer {
    Transformer::new(format!("label {}", value), move |def: &mut Definition| {
        def.set(&["metadata", "labels", "test"], serde_json::Value::from(value))
    })
}

#[test]
fn transform_runs_all_transformers_on_both_sets_in_order() -> Result<()> {
    let mut set = ManifestSet::default();
    let mut defs = parse_documents(DEFS)?;
    set.add_to_delete(defs.split_off(2));
    set.add_to_apply(defs);
    set.add_transformers(vec![label("first"), label("second")]);
    set.transform()?;

    for def in set.to_apply.iter().chain(set.to_delete.iter()) {
        assert!(def.label("test") == Some("second"), "expected transformers to run in order on {}, got {:?}", def.id(), def.label("test"));
    }
    Ok(())
}

#[test]
fn transform_names_failing_transformer_and_definition() -> Result<()> {
    let mut set = ManifestSet::default();
    set.add_to_apply(parse_documents(DEFS)?);
    set.add_transformer(Transformer::new("always fails", |def: &mut Definition| {
        if def.kind() == "Deployment" {
            bail!("boom");
        }
        Ok(())
    }));
    let err = match set.transform() {
        Ok(()) => bail!("expected transform to fail"),
        Err(err) => err,
    };
    let msg = format!("{:#}", err);
    assert!(msg.contains("always fails"), "expected error to name the transformer, got {}", msg);
    assert!(msg.contains("Deployment knative-eventing/imc-dispatcher"), "expected error to name the definition, got {}", msg);
    Ok(())
}

#[test]
fn append_accumulates_definitions_and_transformers() -> Result<()> {
    let mut first = ManifestSet::default();
    first.add_to_apply(parse_documents(DEFS)?);
    first.add_transformer(label("a"));
    let mut second = ManifestSet::default();
    second.add_to_delete(parse_documents(DEFS)?);
    second.add_transformer(label("b"));
    first.append(second);

    assert!(first.to_apply.len() == 3, "unexpected apply set {:?}", first.to_apply);
    assert!(first.to_delete.len() == 3, "unexpected delete set {:?}", first.to_delete);
    let names: Vec<_> = first.transformers().iter().map(|t| t.name()).collect();
    assert!(names == vec!["label a", "label b"], "unexpected transformers {:?}", names);
    Ok(())
}

#[test]
fn move_to_delete_moves_matching_definitions() -> Result<()> {
    let mut set = ManifestSet::default();
    set.add_to_apply(parse_documents(DEFS)?);
    let moved = set.move_to_delete(|def| def.is("HorizontalPodAutoscaler", "knative-eventing", "broker-ingress-hpa"));

    assert!(moved == 1, "expected one moved definition, got {}", moved);
    assert!(
        !set.contains("HorizontalPodAutoscaler", "knative-eventing", "broker-ingress-hpa"),
        "expected the autoscaler to leave the apply set"
    );
    assert!(set.to_delete.len() == 1, "unexpected delete set {:?}", set.to_delete);
    assert!(set.deployments().count() == 1, "expected the deployment to stay in the apply set");
    Ok(())
}

#[test]
fn sort_orders_apply_and_delete_sets() -> Result<()> {
    let mut set = ManifestSet::default();
    set.add_to_apply(parse_documents(DEFS)?);
    set.add_to_delete(parse_documents(DEFS)?);
    set.sort();

    let apply: Vec<_> = set.to_apply.iter().map(|def| def.kind()).collect();
    let delete: Vec<_> = set.to_delete.iter().map(|def| def.kind()).collect();
    assert!(apply == vec!["ConfigMap", "Deployment", "HorizontalPodAutoscaler"], "unexpected apply order {:?}", apply);
    assert!(delete == vec!["HorizontalPodAutoscaler", "Deployment", "ConfigMap"], "unexpected delete order {:?}", delete);
    Ok(())
}
