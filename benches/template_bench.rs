//! Quick benchmark to verify rendering and expansion performance

use std::time::Instant;

use tektonc::{expand_document, render, RenderMode, Scope};

fn main() {
    let scope = Scope::from_yaml_str(
        "namespace: llmd\nmodel: meta-llama/Llama-3.1-8B\nregion: us\nreplicas: 4",
    )
    .unwrap();

    // Test templates of varying complexity
    let templates = vec![
        "Simple text with no templates",
        "deploy-{{ region }}",
        "{{ model|dns }}-{{ region }}-{{ replicas }}",
        "{{ namespace }}/{{ model|slug }}/{{ unknown|default('x') }}",
        "{{ model|replace('/', '-')|lower }} {{ region|upper }} {{ namespace|tojson }}",
    ];

    println!("Template Rendering Performance Test");
    println!("===================================\n");

    // Warm up the cache
    for template in &templates {
        let _ = render(template, &scope, RenderMode::Strict);
    }

    for template in &templates {
        let iterations = 100_000;
        let start = Instant::now();

        for _ in 0..iterations {
            let _ = render(template, &scope, RenderMode::Strict);
        }

        let elapsed = start.elapsed();
        let per_op = elapsed / iterations;

        println!("Template: {:60}", format!("\"{}\"", template));
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per operation: {:?}\n", per_op);
    }

    println!("Loop Expansion Performance");
    println!("==========================\n");

    let doc: serde_yaml::Value = serde_yaml::from_str(
        r#"
spec:
  tasks:
    - loopName: sweep
      foreach:
        domain:
          model: [a, b, c, d, e, f, g, h]
          rate: [1, 2, 4, 8, 16, 32]
          gpu: [a100, h100, l40s]
      tasks:
        - name: "deploy-{{ model }}-{{ gpu }}"
          params:
            - {name: namespace, value: "{{ namespace }}"}
            - {name: rate, value: "{{ rate }}"}
        - loopName: repeat
          foreach: {domain: {run: [1, 2]}}
          tasks:
            - name: "bench-{{ model }}-{{ rate }}-{{ run }}"
              runAfter: ["deploy-{{ model }}-{{ gpu }}"]
"#,
    )
    .unwrap();

    let iterations = 200;
    let start = Instant::now();
    let mut emitted = 0;
    for _ in 0..iterations {
        let out = expand_document(&doc, &scope).unwrap();
        emitted = out["spec"]["tasks"].as_sequence().map_or(0, |s| s.len());
    }
    let elapsed = start.elapsed();

    println!("  Tasks per expansion: {}", emitted);
    println!("  Time for {} expansions: {:?}", iterations, elapsed);
    println!("  Per expansion: {:?}", elapsed / iterations);
}
