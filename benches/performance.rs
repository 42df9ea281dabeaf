//! Performance benchmarks for Warden.
//!
//! Run with: cargo bench
//!
//! Target performance:
//! - Install arbitration: < 5µs per proposal
//! - Disable-reason set operations: < 50ns

use std::path::PathBuf;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use warden::extensions::{CreationFlags, DisableReason, DisableReasonSet, InstallSource};
use warden::external::ExternalInstallInfoFile;
use warden::pending::{InstalledInfo, PendingExtensionManager, ProposalContext};

/// 32-character id in `a..=p` derived from a counter.
fn id_for(n: usize) -> String {
    (0..32)
        .map(|i| (b'a' + ((n >> (i % 8)) as u8 & 0x0f)) as char)
        .collect()
}

fn file(id: &str, source: InstallSource, version: &str) -> ExternalInstallInfoFile {
    ExternalInstallInfoFile {
        id: id.to_string(),
        version: version.parse().unwrap(),
        path: PathBuf::from("/ext"),
        source,
        creation_flags: CreationFlags::default(),
        mark_acknowledged: false,
    }
}

/// Benchmark proposals competing for the same id.
fn bench_arbitration(c: &mut Criterion) {
    let mut group = c.benchmark_group("arbitration");
    let id = id_for(1);
    let context = ProposalContext::default();

    group.bench_function("escalating_sources", |b| {
        let proposals = [
            file(&id, InstallSource::ExternalFile, "1.0"),
            file(&id, InstallSource::ExternalPref, "1.0"),
            file(&id, InstallSource::ExternalPrefDownload, "0.9"),
            file(&id, InstallSource::ExternalRegistry, "0.8"),
        ];
        b.iter(|| {
            let mut pending = PendingExtensionManager::new();
            for proposal in &proposals {
                black_box(pending.add_from_external_file(proposal, &context));
            }
            black_box(pending.len())
        })
    });

    let installed = ProposalContext {
        installed: Some(InstalledInfo {
            location: InstallSource::ExternalPolicyDownload,
            version: "1.0".parse().unwrap(),
        }),
        uninstall_marker: None,
    };
    let loser = file(&id, InstallSource::ExternalPref, "2.0");
    group.bench_function("rejected_by_installed", |b| {
        let mut pending = PendingExtensionManager::new();
        b.iter(|| black_box(pending.add_from_external_file(black_box(&loser), &installed)))
    });

    for count in [10usize, 100, 1000] {
        let proposals: Vec<_> = (0..count)
            .map(|n| file(&id_for(n), InstallSource::ExternalPref, "1.0"))
            .collect();
        group.bench_with_input(BenchmarkId::new("fill", count), &proposals, |b, proposals| {
            b.iter(|| {
                let mut pending = PendingExtensionManager::new();
                for proposal in proposals {
                    pending.add_from_external_file(proposal, &context);
                }
                black_box(pending.len())
            })
        });
    }

    group.finish();
}

/// Benchmark disable-reason set bookkeeping.
fn bench_disable_reasons(c: &mut Criterion) {
    let mut group = c.benchmark_group("disable_reasons");
    let full: DisableReasonSet = DisableReason::ALL.into_iter().collect();

    group.bench_function("insert_remove_all", |b| {
        b.iter(|| {
            let mut set = DisableReasonSet::empty();
            for reason in DisableReason::ALL {
                set.insert(reason);
            }
            for reason in DisableReason::ALL {
                set.remove(reason);
            }
            black_box(set)
        })
    });

    group.bench_function("authority_owned", |b| {
        b.iter(|| black_box(black_box(full).authority_owned()))
    });

    group.bench_function("display", |b| b.iter(|| black_box(full.to_string())));

    group.finish();
}

criterion_group!(benches, bench_arbitration, bench_disable_reasons);
criterion_main!(benches);
