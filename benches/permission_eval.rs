use criterion::{black_box, criterion_group, criterion_main, Criterion};

use agent_core::{Mode, PermissionManager, PermissionRule, Specifier, ToolAnnotations};

fn rules_fixture() -> Vec<PermissionRule> {
    vec![
        PermissionRule::deny(Specifier::NameGlob("rm_rf".into()), "too dangerous"),
        PermissionRule::allow(Specifier::NameGlob("read_*".into())),
        PermissionRule::ask(Specifier::PathGlob("/etc/*".into()), "system path"),
        PermissionRule::deny(Specifier::CommandPrefix("sudo".into()), "no sudo"),
        PermissionRule::allow(Specifier::Domain("api.example.com".into())),
    ]
}

fn bench_evaluate_tool_use(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = PermissionManager::new(Mode::Default, rules_fixture());
    let annotations = ToolAnnotations::default();

    c.bench_function("evaluate_tool_use_no_match_falls_through_to_ask", |b| {
        b.iter(|| {
            rt.block_on(async {
                let decision = manager
                    .evaluate_tool_use(black_box("write_file"), &serde_json::json!({}), &annotations)
                    .await
                    .unwrap();
                black_box(decision);
            })
        })
    });

    c.bench_function("evaluate_tool_use_matches_deny_rule", |b| {
        b.iter(|| {
            rt.block_on(async {
                let decision = manager
                    .evaluate_tool_use(black_box("rm_rf"), &serde_json::json!({}), &annotations)
                    .await
                    .unwrap();
                black_box(decision);
            })
        })
    });
}

fn bench_session_allowlist_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = PermissionManager::new(Mode::Default, vec![]);
    manager.allow_for_session("bash");
    let annotations = ToolAnnotations::default();

    c.bench_function("evaluate_tool_use_session_allowlist_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let decision = manager
                    .evaluate_tool_use(black_box("bash_exec"), &serde_json::json!({}), &annotations)
                    .await
                    .unwrap();
                black_box(decision);
            })
        })
    });
}

criterion_group!(benches, bench_evaluate_tool_use, bench_session_allowlist_hit);
criterion_main!(benches);
