use anyhow::Result;

use super::*;

fn defs(kinds: &[(&str, &str)]) -> Result<Vec<Definition>> {
    kinds
        .iter()
        .map(|(kind, name)| Definition::from_value(serde_json::json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}})))
        .collect()
}

fn names(defs: &[Definition]) -> Vec<&str> {
    defs.iter().map(|def| def.name()).collect()
}

#[test]
fn sort_for_apply_orders_by_kind_priority() -> Result<()> {
    let mut set = defs(&[
        ("ValidatingWebhookConfiguration", "webhook"),
        ("Deployment", "controller"),
        ("Broker", "custom"),
        ("ConfigMap", "config"),
        ("Namespace", "ns"),
        ("CustomResourceDefinition", "crd"),
        ("ServiceAccount", "sa"),
        ("HorizontalPodAutoscaler", "hpa"),
    ])?;
    sort_for_apply(&mut set);
    let expected = vec!["ns", "sa", "config", "crd", "controller", "hpa", "custom", "webhook"];
    assert!(names(&set) == expected, "unexpected apply order {:?}, expected {:?}", names(&set), expected);
    Ok(())
}

#[test]
fn sort_for_apply_is_stable_within_a_kind() -> Result<()> {
    let mut set = defs(&[("Deployment", "b"), ("ConfigMap", "z"), ("Deployment", "a"), ("ConfigMap", "y")])?;
    sort_for_apply(&mut set);
    let expected = vec!["z", "y", "b", "a"];
    assert!(names(&set) == expected, "unexpected apply order {:?}, expected {:?}", names(&set), expected);
    Ok(())
}

#[test]
fn sort_for_delete_reverses_apply_order() -> Result<()> {
    let kinds = [("Deployment", "controller"), ("Namespace", "ns"), ("MutatingWebhookConfiguration", "webhook"), ("Service", "svc")];
    let mut apply = defs(&kinds)?;
    let mut delete = defs(&kinds)?;
    sort_for_apply(&mut apply);
    sort_for_delete(&mut delete);
    let mut reversed = names(&apply);
    reversed.reverse();
    assert!(names(&delete) == reversed, "unexpected delete order {:?}, expected {:?}", names(&delete), reversed);
    Ok(())
}

#[test]
fn unknown_kinds_rank_between_listed_kinds_and_webhooks() {
    assert!(kind_rank("APIService") < kind_rank("KafkaChannel"), "expected unknown kinds after listed kinds");
    assert!(kind_rank("KafkaChannel") == kind_rank("Trigger"), "expected all unknown kinds to share a rank");
    assert!(
        kind_rank("KafkaChannel") < kind_rank("MutatingWebhookConfiguration"),
        "expected unknown kinds before webhooks"
    );
}
