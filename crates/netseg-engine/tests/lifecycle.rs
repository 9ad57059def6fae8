//! Lifecycle and referential integrity.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use netseg_core::model::{
    Action, Direction, EndpointSpec, GroupKey, GroupSpec, Protocol, RuleSpec, TieBreak, Verdict,
};
use netseg_engine::notify::{EventKind, Notifier, PolicyEvent};
use netseg_engine::Engine;

use fixture::*;

fn code<T>(res: netseg_core::Result<T>) -> &'static str {
    match res {
        Ok(_) => panic!("expected an error"),
        Err(e) => e.code().as_str(),
    }
}

fn any_in(id: &str) -> RuleSpec {
    RuleSpec::new(id, Direction::In, Protocol::Tcp, Action::Allow)
}

#[test]
fn default_tenant_exists_and_is_permanent() {
    let engine = Engine::standalone();
    assert!(engine.has_tenant("default"));
    assert_eq!(code(engine.delete_tenant("default")), "VALIDATION");
    assert_eq!(code(engine.create_tenant("default")), "DUPLICATE_ID");
}

#[test]
fn tenant_with_children_cannot_be_deleted() {
    let engine = Engine::standalone();
    engine.create_tenant("acme").unwrap();
    engine.create_network("acme", &private_net()).unwrap();
    engine.create_policy("acme", "web").unwrap();

    assert_eq!(code(engine.delete_tenant("acme")), "REFERENTIAL_INTEGRITY");
    engine.delete_network("acme", "private").unwrap();
    assert_eq!(code(engine.delete_tenant("acme")), "REFERENTIAL_INTEGRITY");
    engine.delete_policy("acme", "web").unwrap();
    engine.delete_tenant("acme").unwrap();

    assert!(!engine.has_tenant("acme"));
    assert_eq!(code(engine.delete_tenant("acme")), "NOT_FOUND");
    assert_eq!(code(engine.create_network("acme", &private_net())), "NOT_FOUND");
    assert_eq!(code(engine.create_policy("acme", "web")), "NOT_FOUND");
}

#[test]
fn network_validation() {
    let engine = Engine::standalone();
    let mut bad_gw = private_net();
    bad_gw.gateway = "192.168.0.1".into();
    assert_eq!(code(engine.create_network(TENANT, &bad_gw)), "VALIDATION");

    let mut bad_tag = private_net();
    bad_tag.encap = netseg_core::model::Encap::Vlan;
    bad_tag.pkt_tag = 5000;
    assert_eq!(code(engine.create_network(TENANT, &bad_tag)), "VALIDATION");

    engine.create_network(TENANT, &private_net()).unwrap();
    assert_eq!(code(engine.create_network(TENANT, &private_net())), "DUPLICATE_ID");
    assert_eq!(engine.network(TENANT, "private").unwrap().pkt_tag, 1);
    assert_eq!(code(engine.network(TENANT, "nope")), "NOT_FOUND");
}

#[test]
fn network_deletion_blocked_by_groups_peers_and_endpoints() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_network(TENANT, &dummy_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();

    // Peer reference.
    engine.add_rule(TENANT, "p", &any_in("1").from_network("dummy")).unwrap();
    assert_eq!(code(engine.delete_network(TENANT, "dummy")), "REFERENTIAL_INTEGRITY");
    engine.remove_rule(TENANT, "p", "1").unwrap();
    engine.delete_network(TENANT, "dummy").unwrap();

    // Group, then endpoint.
    engine.create_group(TENANT, &GroupSpec::new("private", "web")).unwrap();
    assert_eq!(code(engine.delete_network(TENANT, "private")), "REFERENTIAL_INTEGRITY");
    engine.register_endpoint(TENANT, &EndpointSpec::new(ip(C1), "private", "web")).unwrap();
    assert_eq!(code(engine.delete_group(TENANT, "private", "web")), "REFERENTIAL_INTEGRITY");

    engine.unregister_endpoint(TENANT, ip(C1)).unwrap();
    engine.delete_group(TENANT, "private", "web").unwrap();
    engine.delete_network(TENANT, "private").unwrap();
    assert_eq!(code(engine.delete_network(TENANT, "private")), "NOT_FOUND");
}

#[test]
fn update_network_only_while_unused_by_endpoints() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_group(TENANT, &GroupSpec::new("private", "web")).unwrap();

    let mut wider = network("private", "10.0.0.0/8", "10.0.0.1", 7);
    let updated = engine.update_network(TENANT, &wider).unwrap();
    assert_eq!(updated.pkt_tag, 7);
    assert_eq!(engine.network(TENANT, "private").unwrap().subnet.prefix(), 8);

    engine.register_endpoint(TENANT, &EndpointSpec::new(ip("10.9.0.1"), "private", "web")).unwrap();
    wider.pkt_tag = 8;
    assert_eq!(code(engine.update_network(TENANT, &wider)), "REFERENTIAL_INTEGRITY");

    assert_eq!(code(engine.update_network(TENANT, &dummy_net())), "NOT_FOUND");
}

#[test]
fn group_creation_requires_network_and_policies() {
    let engine = Engine::standalone();
    assert_eq!(code(engine.create_group(TENANT, &GroupSpec::new("private", "web"))), "NOT_FOUND");

    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "a").unwrap();
    let spec = GroupSpec::new("private", "web").with_policies(["a", "missing"]);
    assert_eq!(code(engine.create_group(TENANT, &spec)), "NOT_FOUND");
    // Nothing left behind by the failed create.
    assert!(engine.groups(TENANT).is_empty());

    let dup = GroupSpec::new("private", "web").with_policies(["a", "a"]);
    assert_eq!(code(engine.create_group(TENANT, &dup)), "VALIDATION");

    let key = engine
        .create_group(TENANT, &GroupSpec::new("private", "web").with_policies(["a"]))
        .unwrap();
    assert_eq!(key, group_key("web"));
    assert_eq!(code(engine.create_group(TENANT, &GroupSpec::new("private", "web"))), "DUPLICATE_ID");
    assert_eq!(engine.attached_policies(&key).unwrap(), vec!["a".to_string()]);
}

#[test]
fn policy_deletion_blocked_while_attached_or_holding_rules() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();
    assert_eq!(code(engine.create_policy(TENANT, "p")), "DUPLICATE_ID");
    let key = engine
        .create_group(TENANT, &GroupSpec::new("private", "web").with_policies(["p"]))
        .unwrap();

    assert_eq!(code(engine.delete_policy(TENANT, "p")), "REFERENTIAL_INTEGRITY");
    engine.detach_policy(&key, "p").unwrap();

    engine.add_rule(TENANT, "p", &any_in("1")).unwrap();
    assert_eq!(code(engine.delete_policy(TENANT, "p")), "REFERENTIAL_INTEGRITY");
    engine.remove_rule(TENANT, "p", "1").unwrap();
    engine.delete_policy(TENANT, "p").unwrap();
    assert_eq!(code(engine.delete_policy(TENANT, "p")), "NOT_FOUND");
}

#[test]
fn deleting_group_detaches_its_policies() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();
    engine
        .create_group(TENANT, &GroupSpec::new("private", "web").with_policies(["p"]))
        .unwrap();

    engine.delete_group(TENANT, "private", "web").unwrap();
    engine.delete_policy(TENANT, "p").unwrap();
    assert_eq!(code(engine.delete_group(TENANT, "private", "web")), "NOT_FOUND");
}

#[test]
fn group_named_as_peer_cannot_be_deleted() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();
    engine.create_group(TENANT, &GroupSpec::new("private", "db")).unwrap();

    engine.add_rule(TENANT, "p", &any_in("1").from_group("private", "db")).unwrap();
    assert_eq!(code(engine.delete_group(TENANT, "private", "db")), "REFERENTIAL_INTEGRITY");
    engine.remove_rule(TENANT, "p", "1").unwrap();
    engine.delete_group(TENANT, "private", "db").unwrap();
}

#[test]
fn rule_peer_must_exist() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();

    assert_eq!(code(engine.add_rule(TENANT, "p", &any_in("1").from_network("nope"))), "VALIDATION");
    assert_eq!(code(engine.add_rule(TENANT, "p", &any_in("1").from_group("private", "nope"))), "VALIDATION");
    assert_eq!(code(engine.add_rule(TENANT, "missing", &any_in("1"))), "NOT_FOUND");
    assert!(engine.rules_for_policy(TENANT, "p").unwrap().is_empty());
}

#[test]
fn duplicate_rule_id_and_missing_rule() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "p").unwrap();

    engine.add_rule(TENANT, "p", &any_in("1").from_network("private")).unwrap();
    assert_eq!(
        code(engine.add_rule(TENANT, "p", &any_in("1").from_network("private"))),
        "DUPLICATE_ID"
    );
    assert_eq!(code(engine.remove_rule(TENANT, "p", "2")), "NOT_FOUND");

    // The rejected duplicate must not leave a peer reference behind.
    engine.remove_rule(TENANT, "p", "1").unwrap();
    engine.delete_policy(TENANT, "p").unwrap();
    engine.delete_network(TENANT, "private").unwrap();
}

#[test]
fn rules_are_listed_by_id() {
    let engine = Engine::standalone();
    engine.create_policy(TENANT, "p").unwrap();
    for id in ["b", "c", "a"] {
        engine.add_rule(TENANT, "p", &any_in(id)).unwrap();
    }
    let ids: Vec<String> = engine
        .rules_for_policy(TENANT, "p")
        .unwrap()
        .iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(engine.policies(TENANT), vec!["p".to_string()]);
}

#[test]
fn attach_and_detach_errors() {
    let engine = two_group_engine(Engine::standalone());
    let srv1 = group_key("srv1");

    assert_eq!(code(engine.attach_policy(&srv1, "first")), "DUPLICATE_ID");
    assert_eq!(code(engine.attach_policy(&srv1, "nope")), "NOT_FOUND");
    assert_eq!(code(engine.attach_policy(&group_key("nope"), "first")), "NOT_FOUND");
    assert_eq!(code(engine.detach_policy(&srv1, "second")), "NOT_FOUND");

    // A failed attach to a missing group leaves the policy deletable.
    engine.create_policy(TENANT, "spare").unwrap();
    assert_eq!(code(engine.attach_policy(&group_key("nope"), "spare")), "NOT_FOUND");
    engine.delete_policy(TENANT, "spare").unwrap();

    engine.attach_policy(&srv1, "second").unwrap();
    assert_eq!(
        engine.attached_policies(&srv1).unwrap(),
        vec!["first".to_string(), "second".to_string()]
    );
    engine.detach_policy(&srv1, "first").unwrap();
    assert_eq!(engine.attached_policies(&srv1).unwrap(), vec!["second".to_string()]);
}

#[test]
fn update_group_replaces_attached_set() {
    let engine = two_group_engine(Engine::standalone());
    engine.create_policy(TENANT, "third").unwrap();

    let spec = GroupSpec::new("private", "srv1").with_policies(["second", "third"]);
    engine.update_group(TENANT, &spec).unwrap();
    assert_eq!(
        engine.attached_policies(&group_key("srv1")).unwrap(),
        vec!["second".to_string(), "third".to_string()]
    );
    // "first" is no longer attached anywhere.
    engine.delete_policy(TENANT, "first").unwrap();

    let bad = GroupSpec::new("private", "srv1").with_policies(["missing"]);
    assert_eq!(code(engine.update_group(TENANT, &bad)), "NOT_FOUND");
    assert_eq!(
        engine.attached_policies(&group_key("srv1")).unwrap(),
        vec!["second".to_string(), "third".to_string()]
    );

    let gone = GroupSpec::new("private", "ghost");
    assert_eq!(code(engine.update_group(TENANT, &gone)), "NOT_FOUND");
}

#[test]
fn endpoint_registration_rules() {
    let engine = two_group_engine(Engine::standalone());

    let outside = EndpointSpec::new(ip("20.1.0.5"), "private", "srv1");
    assert_eq!(code(engine.register_endpoint(TENANT, &outside)), "VALIDATION");

    let dup = EndpointSpec::new(ip(C1), "private", "srv2");
    assert_eq!(code(engine.register_endpoint(TENANT, &dup)), "DUPLICATE_ID");

    let no_group = EndpointSpec::new(ip("10.1.0.77"), "private", "nope");
    assert_eq!(code(engine.register_endpoint(TENANT, &no_group)), "NOT_FOUND");

    let rec = engine.endpoint(TENANT, ip(C1)).unwrap();
    assert_eq!((rec.network.as_str(), rec.group.as_str()), ("private", "srv1"));
    assert_eq!(engine.metrics().endpoints.get(&[("tenant", TENANT)]), 3);

    engine.unregister_endpoint(TENANT, ip(C1)).unwrap();
    assert!(engine.endpoint(TENANT, ip(C1)).is_none());
    assert_eq!(code(engine.unregister_endpoint(TENANT, ip(C1))), "NOT_FOUND");
    assert_eq!(engine.metrics().endpoints.get(&[("tenant", TENANT)]), 2);

    // Rejected registrations hold no references: srv1 is now empty.
    engine.detach_policy(&group_key("srv1"), "first").unwrap();
    engine.delete_group(TENANT, "private", "srv1").unwrap();
}

#[test]
fn same_ip_in_two_tenants() {
    let engine = Engine::standalone();
    engine.create_tenant("other").unwrap();
    for tenant in [TENANT, "other"] {
        engine.create_network(tenant, &private_net()).unwrap();
        engine.create_group(tenant, &GroupSpec::new("private", "web")).unwrap();
        engine
            .register_endpoint(tenant, &EndpointSpec::new(ip(C1), "private", "web"))
            .unwrap();
    }
    assert_eq!(engine.groups("other"), vec![GroupKey::new("other", "private", "web")]);
}

#[test]
fn verdict_for_missing_group_is_not_found() {
    let engine = Engine::standalone();
    let flow = netseg_core::model::FlowDescriptor::new(
        Direction::In,
        Protocol::Tcp,
        netseg_core::model::FlowEndpoint::new(ip(C2)),
        netseg_core::model::FlowEndpoint::new(ip(C1)),
        Some(80),
    );
    assert_eq!(code(engine.verdict(&group_key("ghost"), &flow)), "NOT_FOUND");
}

#[test]
fn events_emitted_per_affected_group() {
    let (notifier, mut rx) = Notifier::channel(64);
    let engine = Engine::new(TieBreak::default(), notifier);
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "shared").unwrap();
    for g in ["a", "b"] {
        engine
            .create_group(TENANT, &GroupSpec::new("private", g).with_policies(["shared"]))
            .unwrap();
    }
    engine.create_group(TENANT, &GroupSpec::new("private", "c")).unwrap();

    let mut drain = || {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    };
    let created = drain();
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|e| e.kind == EventKind::GroupCreated));

    engine.add_rule(TENANT, "shared", &any_in("1")).unwrap();
    let mut groups: Vec<String> = drain()
        .into_iter()
        .map(|e| {
            assert_eq!(e.kind, EventKind::RuleAdded);
            e.group.group
        })
        .collect();
    groups.sort();
    assert_eq!(groups, ["a", "b"]);

    engine.attach_policy(&group_key("c"), "shared").unwrap();
    assert_eq!(
        drain(),
        vec![PolicyEvent {
            kind: EventKind::PolicyAttached,
            group: group_key("c")
        }]
    );

    engine.remove_rule(TENANT, "shared", "1").unwrap();
    assert_eq!(drain().len(), 3);

    engine.register_endpoint(TENANT, &EndpointSpec::new(ip(C1), "private", "a")).unwrap();
    engine.unregister_endpoint(TENANT, ip(C1)).unwrap();
    let kinds: Vec<EventKind> = drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [EventKind::EndpointAdded, EventKind::EndpointRemoved]);

    // Rejected mutations notify nobody.
    let _ = engine.attach_policy(&group_key("c"), "shared");
    assert!(drain().is_empty());

    // Subnet changes reach the groups whose rules select peers by that network.
    engine.create_network(TENANT, &dummy_net()).unwrap();
    engine.create_policy(TENANT, "egress").unwrap();
    engine.attach_policy(&group_key("c"), "egress").unwrap();
    engine
        .add_rule(
            TENANT,
            "egress",
            &RuleSpec::new("1", Direction::Out, Protocol::Tcp, Action::Deny).to_network("dummy"),
        )
        .unwrap();
    drain();
    engine
        .update_network(TENANT, &network("dummy", "30.1.0.0/16", "30.1.1.254", 2))
        .unwrap();
    assert_eq!(
        drain(),
        vec![PolicyEvent {
            kind: EventKind::NetworkUpdated,
            group: group_key("c")
        }]
    );

    // Group selectors depend on their network's subnet too.
    engine
        .add_rule(
            TENANT,
            "egress",
            &RuleSpec::new("2", Direction::Out, Protocol::Tcp, Action::Allow).to_group("private", "a"),
        )
        .unwrap();
    drain();
    engine
        .update_network(TENANT, &network("private", "10.0.0.0/8", "10.0.0.1", 1))
        .unwrap();
    let kinds: Vec<(EventKind, String)> = drain().into_iter().map(|e| (e.kind, e.group.group)).collect();
    assert_eq!(kinds, [(EventKind::NetworkUpdated, "c".to_string())]);

    // Nobody selects by this one.
    engine.create_network(TENANT, &network("spare", "40.1.0.0/16", "40.1.1.254", 3)).unwrap();
    engine
        .update_network(TENANT, &network("spare", "41.1.0.0/16", "41.1.1.254", 3))
        .unwrap();
    assert!(drain().is_empty());
}

#[test]
fn network_update_moves_verdicts_and_tells_the_dataplane() {
    let (notifier, mut rx) = Notifier::channel(64);
    let engine = two_group_engine(Engine::new(TieBreak::default(), notifier));
    engine
        .add_rule(
            TENANT,
            "first",
            &RuleSpec::new("1", Direction::Out, Protocol::Tcp, Action::Deny).to_network("dummy"),
        )
        .unwrap();
    while rx.try_recv().is_ok() {}

    assert_eq!(tcp(&engine, C1, "30.1.0.9", 443), Verdict::Allow);
    engine
        .update_network(TENANT, &network("dummy", "30.1.0.0/16", "30.1.1.254", 2))
        .unwrap();
    assert_eq!(tcp(&engine, C1, "30.1.0.9", 443), Verdict::Deny);
    assert_eq!(tcp(&engine, C1, "20.1.0.9", 443), Verdict::Allow);

    assert_eq!(
        rx.try_recv().unwrap(),
        PolicyEvent {
            kind: EventKind::NetworkUpdated,
            group: group_key("srv1")
        }
    );
    assert!(rx.try_recv().is_err());
}

#[test]
fn failed_group_create_leaves_no_links() {
    let engine = Engine::standalone();
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_policy(TENANT, "a").unwrap();
    engine
        .create_group(TENANT, &GroupSpec::new("private", "web").with_policies(["a"]))
        .unwrap();

    engine.create_policy(TENANT, "b").unwrap();
    let again = GroupSpec::new("private", "web").with_policies(["b"]);
    assert_eq!(code(engine.create_group(TENANT, &again)), "DUPLICATE_ID");
    // "b" was linked and then unlinked by the rejected create.
    engine.delete_policy(TENANT, "b").unwrap();
    assert_eq!(engine.attached_policies(&group_key("web")).unwrap(), vec!["a".to_string()]);

    engine.delete_group(TENANT, "private", "web").unwrap();
    engine.delete_policy(TENANT, "a").unwrap();
    engine.delete_network(TENANT, "private").unwrap();
}

#[test]
fn full_queue_drops_and_counts() {
    let (notifier, mut rx) = Notifier::channel(1);
    let engine = Engine::new(TieBreak::default(), notifier);
    engine.create_network(TENANT, &private_net()).unwrap();
    engine.create_group(TENANT, &GroupSpec::new("private", "a")).unwrap();
    engine.create_group(TENANT, &GroupSpec::new("private", "b")).unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.notifications.get(&[("outcome", "sent")]), 1);
    assert_eq!(metrics.notifications.get(&[("outcome", "queue_full")]), 1);
    assert_eq!(rx.try_recv().unwrap().group, group_key("a"));

    drop(rx);
    engine.create_group(TENANT, &GroupSpec::new("private", "c")).unwrap();
    assert_eq!(engine.metrics().notifications.get(&[("outcome", "closed")]), 1);
}

#[test]
fn mutation_metrics_record_error_codes() {
    let engine = Engine::standalone();
    engine.create_policy(TENANT, "p").unwrap();
    let _ = engine.create_policy(TENANT, "p");
    let _ = engine.remove_rule(TENANT, "p", "nope");

    let m = engine.metrics();
    assert_eq!(m.mutations.get(&[("op", "create_policy"), ("result", "ok")]), 1);
    assert_eq!(m.mutations.get(&[("op", "create_policy"), ("result", "DUPLICATE_ID")]), 1);
    assert_eq!(m.mutations.get(&[("op", "remove_rule"), ("result", "NOT_FOUND")]), 1);

    let text = engine.render_metrics();
    assert!(text.contains("netseg_mutations_total"));
}
