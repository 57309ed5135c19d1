pub mod movie_recorder;
