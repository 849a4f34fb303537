use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use metaspn_lake::{Activity, ActivityFilter, ActivityType, Lake};
use tempfile::TempDir;

struct Tier {
    name: &'static str,
    activity_count: usize,
}

const TIERS: [Tier; 2] = [
    Tier {
        name: "small",
        activity_count: 1_000,
    },
    Tier {
        name: "medium",
        activity_count: 20_000,
    },
];

const PLATFORMS: [&str; 5] = ["podcast", "blog", "twitter", "youtube", "book"];

fn build_lake(tier: &Tier) -> (TempDir, Lake) {
    let tmp = TempDir::new().expect("tempdir");
    let mut lake = Lake::init(tmp.path()).expect("init");
    let base = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).single().expect("base");

    let batch: Vec<Activity> = (0..tier.activity_count)
        .map(|i| {
            let platform = PLATFORMS[i % PLATFORMS.len()];
            let activity_type = if i % 3 == 0 {
                ActivityType::Consume
            } else {
                ActivityType::Create
            };
            let minutes = i64::try_from(i).unwrap_or_default() * 47;
            Activity::builder(base + Duration::minutes(minutes), platform, activity_type)
                .title(format!("synthetic {platform} {i}"))
                .content("x".repeat(200))
                .build()
        })
        .collect();
    for chunk in batch.chunks(1_000) {
        lake.append(chunk).expect("append");
    }
    (tmp, lake)
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("loader.query");
    group.sample_size(20);

    for tier in TIERS {
        let (_scan_tmp, scan_lake) = build_lake(&tier);
        let (_index_tmp, mut index_lake) = build_lake(&tier);
        index_lake.rebuild_index().expect("rebuild");
        group.throughput(Throughput::Elements(tier.activity_count as u64));

        let filter = ActivityFilter::new().platform("twitter").activity_type(ActivityType::Create);

        group.bench_with_input(BenchmarkId::new("full_scan", tier.name), &filter, |b, filter| {
            b.iter(|| black_box(scan_lake.loader().query(filter).expect("query").count()));
        });
        group.bench_with_input(BenchmarkId::new("manifest", tier.name), &filter, |b, filter| {
            b.iter(|| black_box(index_lake.loader().query(filter).expect("query").count()));
        });
        group.bench_with_input(BenchmarkId::new("count_manifest", tier.name), &tier, |b, _| {
            let platform_only = ActivityFilter::new().platform("blog");
            b.iter(|| black_box(index_lake.loader().count(&platform_only).expect("count")));
        });
        group.bench_with_input(BenchmarkId::new("rebuild", tier.name), &tier, |b, _| {
            b.iter(|| black_box(index_lake.rebuild_index().expect("rebuild").activity_count));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queries);
criterion_main!(benches);
