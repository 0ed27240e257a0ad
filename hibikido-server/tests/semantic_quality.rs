//! Retrieval quality against the real sentence-embedding model.
//!
//! Ignored by default: the first run downloads the ONNX model. Run with
//! `cargo test --test semantic_quality -- --ignored`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use hibikido_common::db::models::Segment;
use hibikido_common::db::Store;
use hibikido_server::embedding::{retriever, SentenceEmbedder, TextEmbedder, VectorIndex};

const DESCRIPTIONS: [&str; 50] = [
    "deep atmospheric drone with slow shifting overtones",
    "metallic scraping against corrugated steel",
    "rain pattering on a tin roof at dusk",
    "distant thunder rolling across an open plain",
    "glassy bell strike with a long shimmering tail",
    "granular static bursts over a low hum",
    "wind moving through dry winter branches",
    "underwater bubbles rising in a narrow tank",
    "footsteps on gravel approaching slowly",
    "choir of voices sustained in a stone cathedral",
    "vinyl crackle and dusty tape hiss",
    "sub bass pulse throbbing like a heartbeat",
    "birdsong scattered through a morning forest",
    "train wheels clattering over rail joints",
    "paper being torn in slow deliberate strips",
    "sizzling oil in a hot iron pan",
    "church organ chord swelling and receding",
    "insect swarm circling in humid air",
    "ice cracking on a frozen lake",
    "rusty gate hinge groaning open",
    "soft synth pad with gentle vibrato",
    "hammer striking an anvil in a workshop",
    "waves collapsing on a pebble beach",
    "crowd murmur in a vast station hall",
    "single piano note decaying into silence",
    "helicopter blades chopping overhead",
    "cat purring close to the microphone",
    "fluorescent tube buzzing and flickering",
    "sand pouring steadily onto a drum skin",
    "muffled techno through a nightclub wall",
    "creaking timbers of an old sailing ship",
    "air raid siren winding up in the distance",
    "fingertips drumming on a wooden table",
    "boiling kettle building toward a whistle",
    "cicadas pulsing in the midday heat",
    "chain dragged slowly across concrete",
    "music box melody slightly out of tune",
    "steam hissing from a radiator valve",
    "dog barking twice in an empty street",
    "pages of a heavy book turning slowly",
    "marbles rolling around a ceramic bowl",
    "electric arc snapping between contacts",
    "horse hooves trotting on cobblestones",
    "low male voice whispering indistinctly",
    "champagne cork pop and fizzing pour",
    "detuned radio sweeping between stations",
    "heavy door slamming down a long corridor",
    "wind chimes stirring in a light breeze",
    "frogs chorusing around a night pond",
    "jet engine spooling up before takeoff",
];

#[test]
#[ignore = "downloads and runs the embedding model"]
fn top1_self_retrieval_rate_is_at_least_90_percent() {
    let dir = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn TextEmbedder> =
        Arc::new(SentenceEmbedder::new("all-MiniLM-L6-v2").unwrap());

    let store = Arc::new(Mutex::new(Store::open(dir.path()).unwrap()));
    let mut index = VectorIndex::new(embedder.dim());

    {
        let mut store = store.lock().unwrap();
        for (i, description) in DESCRIPTIONS.iter().enumerate() {
            store.segments.insert(Segment {
                id: 0,
                source_path: format!("lib/{i:02}.wav"),
                start: 0.0,
                end: 1.0,
                description: description.to_string(),
                ai_description: None,
                embedding_text: String::new(),
                index_id: None,
                features: None,
                bark_raw: vec![0.0; 24],
                bark_norm: 0.0,
                onsets_low_mid: vec![],
                onsets_mid: vec![],
                onsets_high_mid: vec![],
                duration: 1.0,
                created_at: Utc::now(),
            });
        }
        retriever::rebuild(&mut store, &mut index, embedder.as_ref());
    }

    let store = store.lock().unwrap();
    let mut top1_hits = 0usize;
    for description in DESCRIPTIONS {
        let hits =
            retriever::search(&store, &index, embedder.as_ref(), description, 1, 0.0).unwrap();
        if let Some(best) = hits.first() {
            if best.description == description && best.score >= 0.9 {
                top1_hits += 1;
            }
        }
    }

    assert!(
        top1_hits * 10 >= DESCRIPTIONS.len() * 9,
        "only {top1_hits}/{} descriptions retrieved themselves at top-1",
        DESCRIPTIONS.len()
    );
}
