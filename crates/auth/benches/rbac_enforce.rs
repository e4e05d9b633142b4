use criterion::{black_box, criterion_group, criterion_main, Criterion};

use warden_auth::{PolicyTuple, RbacModel};

fn build_model(roles: usize, procedures: usize) -> RbacModel {
    let mut tuples = Vec::with_capacity(roles * procedures);
    for r in 0..roles {
        for p in 0..procedures {
            tuples.push(PolicyTuple::new(format!("role-{r}"), format!("pkg.v1.Svc{p}/Method")));
        }
    }
    RbacModel::from_tuples(&tuples)
}

fn bench_enforce(c: &mut Criterion) {
    let model = build_model(32, 256);

    c.bench_function("enforce_hit", |b| {
        b.iter(|| model.enforce(black_box("role-17"), black_box("pkg.v1.Svc200/Method")))
    });

    c.bench_function("enforce_miss", |b| {
        b.iter(|| model.enforce(black_box("role-17"), black_box("pkg.v1.Unknown/Method")))
    });
}

criterion_group!(benches, bench_enforce);
criterion_main!(benches);
