/// Benchmarks for inbound frame normalization.
///
/// Every frame received from the chat backend goes through `InboundMessage::from_text`
/// on the connection task, so this is the hot path while an answer is streaming.
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lexai_realtime::classify::MessageClassifier;
use lexai_realtime::ws::InboundMessage;

fn bench_from_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound/from_text");

    let frames = [
        (
            "answer",
            r#"{
                "type": "answer",
                "message": "Kira sözleşmesi, TBK 347 uyarınca belirsiz süreli ise kanuni fesih dönemlerine uyularak feshedilebilir.",
                "sources": [
                    {"title": "Türk Borçlar Kanunu m. 347", "score": 0.91},
                    {"title": "Yargıtay 3. HD 2021/1234", "score": 0.84}
                ]
            }"#,
        ),
        ("status_text", "🤖 Yanıt hazırlanıyor, lütfen bekleyin..."),
        ("malformed", r#"{"type": "answer", "message": "kesik"#),
        ("array", r#"[{"message":"bir"},{"message":"iki"},{"message":"üç"}]"#),
    ];

    for (name, frame) in frames {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), frame, |b, frame| {
            b.iter(|| InboundMessage::from_text(std::hint::black_box(frame)));
        });
    }

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound/classify");
    let classifier = MessageClassifier::default();

    let reply = InboundMessage::from_text(
        r#"{"response":"İhbar süreleri İş Kanunu madde 17'de kıdeme göre belirlenmiştir."}"#,
    );
    let status = InboundMessage::from_text("📊 12 belge bulundu");

    group.bench_function("reply", |b| {
        b.iter(|| classifier.classify(std::hint::black_box(&reply)));
    });
    group.bench_function("status", |b| {
        b.iter(|| classifier.classify(std::hint::black_box(&status)));
    });

    group.finish();
}

criterion_group!(inbound_benches, bench_from_text, bench_classify);
criterion_main!(inbound_benches);
