pub(crate) use mock_engine::MockEngine;

mod mock_time;
pub(crate) use mock_time::MockTimeSupplier;

mod test_sliding_window;
