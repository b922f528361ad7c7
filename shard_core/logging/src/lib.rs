#[macro_export]
macro_rules! timed {
    ($hist:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let res = { $block };
        $hist.observe(start.elapsed().as_secs_f64());
        res
    }};
}
