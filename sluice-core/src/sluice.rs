tonic::include_proto!("sluice");
