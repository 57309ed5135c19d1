pub mod packet_writer;
