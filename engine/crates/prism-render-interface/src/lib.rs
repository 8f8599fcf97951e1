pub mod frame_counter;
pub mod gpu_task;
pub mod pipeline_cache;
pub mod render_graph_settings;
