//! Verbose initialization
//!
//! Kept in its own binary: it replaces the global logger.

use ngen::logging::{global_events, AllocEvent};
use ngen::object::HEADER_WORDS;
use ngen::{GenerationHint, NgenConfig, OomKind, TypeId};

#[test]
fn test_verbose_init_logs_out_of_memory() -> anyhow::Result<()> {
    let config = NgenConfig {
        heap_size: 2 * 1024 * 1024,
        max_generations: 2,
        tlab_words: 1024,
        verbose: true,
        ..Default::default()
    };
    let words = config.heap_size;
    let dispatcher = ngen::init_with_config(config)?;
    let thread = dispatcher.new_thread();
    let ty = TypeId::new(3).unwrap();

    let small = dispatcher.allocate_object(&thread, ty, GenerationHint::NONE, HEADER_WORDS)?;
    assert_eq!(small.type_id(), Some(ty));

    let err = dispatcher
        .allocate_object(&thread, ty, GenerationHint::NONE, words)
        .unwrap_err();
    assert_eq!(err.oom_kind(), Some(OomKind::HeapSpace));

    let logged: Vec<_> = global_events()
        .into_iter()
        .filter(|event| matches!(event, AllocEvent::OutOfMemory { .. }))
        .collect();
    assert_eq!(
        logged,
        vec![AllocEvent::OutOfMemory {
            kind: OomKind::HeapSpace.message().to_string(),
            requested_words: words,
        }]
    );
    Ok(())
}
