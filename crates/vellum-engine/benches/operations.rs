use criterion::{criterion_group, criterion_main, Criterion};
use vellum_engine::{
    BlockDefinition, BlockId, BlockValue, ContentAddress, Editor, Marks, Operation, Schema,
};

fn schema() -> Schema {
    Schema::builder()
        .block(BlockDefinition::flow("paragraph"))
        .block(BlockDefinition::inline("mention"))
        .mark("bold")
        .build()
        .unwrap()
}

fn document(blocks: usize) -> Vec<BlockValue> {
    (0..blocks)
        .map(|i| BlockValue::with_text("paragraph", format!("Paragraph number {i} with some text")))
        .collect()
}

fn root_id(editor: &Editor, index: usize) -> BlockId {
    BlockId::from(editor.value()[index].id.as_deref().unwrap())
}

fn bench_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("operations");
    group.sample_size(10);

    group.bench_function("insert_text", |b| {
        let mut editor = Editor::from_value(schema(), &document(100)).unwrap();
        let block = root_id(&editor, 50);
        b.iter(|| {
            let result = editor.apply(Operation::InsertText {
                block: block.clone(),
                start: std::hint::black_box(ContentAddress { part: 0, offset: 5 }),
                end: ContentAddress { part: 0, offset: 5 },
                text: std::hint::black_box("x".to_string()),
                marks: Marks::new(),
                auto_dot: false,
            });
            std::hint::black_box(result).unwrap();
        });
    });

    group.bench_function("split_then_merge", |b| {
        let mut editor = Editor::from_value(schema(), &document(100)).unwrap();
        let block = root_id(&editor, 50);
        b.iter(|| {
            let new_block = editor
                .apply(Operation::SplitBlock {
                    block: block.clone(),
                    at: ContentAddress {
                        part: 0,
                        offset: 10,
                    },
                })
                .unwrap()
                .unwrap();
            editor
                .apply(Operation::MergeBlockBackward { block: new_block })
                .unwrap();
        });
    });

    group.bench_function("document_value", |b| {
        let editor = Editor::from_value(schema(), &document(100)).unwrap();
        b.iter(|| std::hint::black_box(editor.value()));
    });

    group.bench_function("load_value", |b| {
        let blocks = document(100);
        b.iter(|| {
            let editor = Editor::from_value(schema(), std::hint::black_box(&blocks)).unwrap();
            std::hint::black_box(editor.version());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_operations);
criterion_main!(benches);
