// Integration tests for directory batches
mod utils;

#[cfg(test)]
mod tests {
    use super::utils::*;
    use deobs_core::deobfuscator::batch::BatchOrchestrator;
    use deobs_core::deobfuscator::processor::ProcessingResult;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_strict_batch_with_one_failing_file() {
        let dir = fixture_dir(&[("a.js", OBFUSCATED_SAMPLE), ("broken.js", "var x = ;")]);
        let processor = processor_with(Some(Box::new(FailingOn::new("broken"))))
            .with_required_primary_pass(true);
        let report = BatchOrchestrator::new(processor).run(dir.path()).unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.successful(), vec!["a.js"]);
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "broken.js");
        assert!(failed[0].1.contains("Unexpected token"));
        assert!(report.has_failures());

        let names = file_names(dir.path());
        assert!(names.contains(&"aDeobs.js".to_string()));
        assert!(!names.contains(&"brokenDeobs.js".to_string()));
        assert_eq!(backups_of(dir.path(), "a.js").len(), 1);
        assert_eq!(backups_of(dir.path(), "broken.js").len(), 1);
        assert_eq!(report.backups.len(), 2);
        // originals, one output, two backups; no staged leftovers
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| !n.ends_with(".deobs-tmp")));

        let output = fs::read_to_string(dir.path().join("aDeobs.js")).unwrap();
        assert!(output.contains("console[\"log\"](\"Hello World\");"));
        assert!(!output.contains("never"));
        assert!(!output.contains("console.clear"));
        assert!(!output.contains("_0x1c2d"));
        assert_eq!(fs::read_to_string(dir.path().join("a.js")).unwrap(), OBFUSCATED_SAMPLE);
    }

    #[test]
    fn test_failed_primary_pass_degrades_by_default() {
        let dir = fixture_dir(&[("a.js", OBFUSCATED_SAMPLE), ("broken.js", "if(false){x()}y()")]);
        let processor = processor_with(Some(Box::new(FailingOn::new("broken"))));
        let report = BatchOrchestrator::new(processor).run(dir.path()).unwrap();

        assert!(!report.has_failures());
        assert_eq!(report.successful(), vec!["a.js", "broken.js"]);
        let degraded = fs::read_to_string(dir.path().join("brokenDeobs.js")).unwrap();
        assert_eq!(degraded, "y()\n");
    }

    #[test]
    fn test_backup_precedes_output() {
        let dir = fixture_dir(&[("app.js", OBFUSCATED_SAMPLE)]);
        let report = BatchOrchestrator::new(processor_with(None)).run(dir.path()).unwrap();

        let output = match report.results.get("app.js") {
            Some(ProcessingResult::Success { output }) => output.clone(),
            other => panic!("unexpected result {:?}", other),
        };
        let backup = &backups_of(dir.path(), "app.js")[0];
        let backup_time = fs::metadata(backup).unwrap().modified().unwrap();
        let output_time = fs::metadata(&output).unwrap().modified().unwrap();
        assert!(backup_time <= output_time);
        assert_eq!(fs::read_to_string(backup).unwrap(), OBFUSCATED_SAMPLE);
    }

    #[test]
    fn test_rerun_skips_own_outputs() {
        let dir = fixture_dir(&[("app.js", OBFUSCATED_SAMPLE), ("deobfuscator.js", "run();")]);
        let orchestrator = BatchOrchestrator::new(processor_with(None));

        let first = orchestrator.run(dir.path()).unwrap();
        let first_output = fs::read_to_string(dir.path().join("appDeobs.js")).unwrap();
        let second = orchestrator.run(dir.path()).unwrap();

        assert_eq!(first.results.keys().collect::<Vec<_>>(), vec!["app.js"]);
        assert_eq!(second.results.keys().collect::<Vec<_>>(), vec!["app.js"]);
        assert_eq!(fs::read_to_string(dir.path().join("appDeobs.js")).unwrap(), first_output);
        assert_eq!(backups_of(dir.path(), "app.js").len(), 2);
        assert!(backups_of(dir.path(), "deobfuscator.js").is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let files: Vec<(String, String)> = (0..12)
            .map(|i| {
                let body = if i % 3 == 0 {
                    OBFUSCATED_SAMPLE.to_string()
                } else {
                    format!("if(!1){{dead{}()}}live{}();console.clear();", i, i)
                };
                (format!("f{:02}.js", i), body)
            })
            .collect();
        let borrowed: Vec<(&str, &str)> =
            files.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
        let sequential_dir = fixture_dir(&borrowed);
        let parallel_dir = fixture_dir(&borrowed);

        let sequential = BatchOrchestrator::new(processor_with(Some(Box::new(CopyPass))))
            .run(sequential_dir.path())
            .unwrap();
        let parallel = BatchOrchestrator::new(processor_with(Some(Box::new(CopyPass))))
            .with_jobs(4)
            .run(parallel_dir.path())
            .unwrap();

        assert_eq!(sequential.len(), 12);
        assert_eq!(
            sequential.results.keys().collect::<Vec<_>>(),
            parallel.results.keys().collect::<Vec<_>>()
        );
        assert!(!parallel.has_failures());
        for (name, _) in &files {
            let out_name = name.replace(".js", "Deobs.js");
            assert_eq!(
                fs::read_to_string(sequential_dir.path().join(&out_name)).unwrap(),
                fs::read_to_string(parallel_dir.path().join(&out_name)).unwrap(),
                "{} differs between sequential and parallel runs",
                out_name
            );
        }
    }

    #[test]
    fn test_progress_reports_every_file() {
        let dir = fixture_dir(&[("a.js", "a();"), ("b.js", "b();"), ("c.js", "c();")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (calls_in, seen_in) = (Arc::clone(&calls), Arc::clone(&seen));

        let report = BatchOrchestrator::new(processor_with(None))
            .with_jobs(2)
            .with_progress(move |file, done, total| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                assert_eq!(total, 3);
                assert!(done >= 1 && done <= total);
                seen_in.lock().unwrap().push(file.input.clone());
            })
            .run(dir.path())
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![dir.path().join("a.js"), dir.path().join("b.js"), dir.path().join("c.js")]
        );
    }
}
